use eframe::egui;

use crate::common::{Origin, SessionView};

pub fn render(ui: &mut egui::Ui, view: &SessionView) {
    egui::ScrollArea::vertical()
        .auto_shrink([false, false])
        .stick_to_bottom(true)
        .max_height(ui.available_height() - 40.0)
        .show(ui, |ui| {
            if view.visible.is_empty() {
                ui.label(egui::RichText::new("No messages yet").weak());
            }
            for message in &view.visible {
                ui.horizontal_wrapped(|ui| {
                    let time = message.sent_at.with_timezone(&chrono::Local).format("%H:%M");
                    ui.label(egui::RichText::new(format!("[{time}]")).weak());

                    let sender = if message.sender == view.local_user {
                        egui::RichText::new("You").strong()
                    } else {
                        egui::RichText::new(&message.sender).strong()
                    };
                    ui.label(sender);

                    if message.origin == Origin::Local {
                        ui.label(egui::RichText::new(&message.content).italics());
                        ui.label(egui::RichText::new("(sending)").weak());
                    } else {
                        ui.label(&message.content);
                    }
                });
            }

            if let Some(contact) = view.selected_contact() {
                if contact.typing {
                    ui.label(egui::RichText::new(format!("{} is typing...", contact.user)).weak());
                }
            }
        });
}
