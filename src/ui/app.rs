use eframe::egui;
use tokio::sync::mpsc;

use crate::common::SessionEvent;
use crate::network::SessionHandle;

use super::components::sidebar::{self, SidebarAction};
use super::components::{banner, chat_area, input_bar};
use super::state::AppState;

pub struct ChatApp {
    state: AppState,
    session: SessionHandle,
    event_receiver: mpsc::Receiver<SessionEvent>,
}

impl ChatApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        session: SessionHandle,
        event_receiver: mpsc::Receiver<SessionEvent>,
    ) -> Self {
        Self {
            state: AppState::new(),
            session,
            event_receiver,
        }
    }

    fn handle_session_events(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            self.state.apply(event);
        }
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_session_events();

        let Some(view) = self.state.view.clone() else {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.spinner();
            });
            ctx.request_repaint();
            return;
        };

        egui::SidePanel::left("contact_sidebar").show(ctx, |ui| {
            match sidebar::render(ui, &view) {
                Some(SidebarAction::Select(peer)) => {
                    self.session.select_conversation(peer);
                }
                Some(SidebarAction::Logout) => {
                    self.session.logout();
                }
                None => {}
            }
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading(self.state.title());
            if banner::render(ui, &view) {
                self.session.retry();
            }
            if let Some(notice) = &self.state.notice {
                ui.colored_label(egui::Color32::LIGHT_RED, notice);
            }
            ui.separator();
            chat_area::render(ui, &view);

            ui.separator();
            let enabled = self.state.can_send();
            let input = input_bar::render(ui, &mut self.state.input_text, enabled);
            if let Some(content) = input.submitted {
                self.session.send_message(content);
            } else if input.changed {
                self.session.draft_changed(self.state.input_text.is_empty());
            }
        });

        ctx.request_repaint();
    }
}
