use eframe::egui;

use crate::common::SessionView;
use crate::network::ConnectionState;

/// Connection status line. Returns true when "Retry" was clicked.
pub fn render(ui: &mut egui::Ui, view: &SessionView) -> bool {
    if view.auth_expired {
        ui.colored_label(
            egui::Color32::RED,
            "Session expired and the saved token was dropped. Restart to log in again.",
        );
        return false;
    }

    let mut retry = false;
    match view.state {
        ConnectionState::Open => {
            ui.colored_label(egui::Color32::GREEN, format!("● {}", view.state.label()));
        }
        ConnectionState::Reconnecting | ConnectionState::Closed => {
            ui.horizontal(|ui| {
                ui.colored_label(egui::Color32::YELLOW, view.state.label());
                if let Some(error) = &view.connection_error {
                    ui.label(egui::RichText::new(error).weak());
                }
                if ui.button("Retry").clicked() {
                    retry = true;
                }
            });
        }
        ConnectionState::Idle | ConnectionState::Connecting => {
            ui.label(format!("{}...", view.state.label()));
        }
    }
    retry
}
