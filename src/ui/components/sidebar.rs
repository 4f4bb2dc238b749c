use eframe::egui;

use crate::common::{ConversationKey, SessionView, UserId};

pub enum SidebarAction {
    /// `None` selects the group chat.
    Select(Option<UserId>),
    Logout,
}

fn with_unread(label: String, unread: usize) -> String {
    if unread == 0 {
        label
    } else {
        format!("{label} ({unread})")
    }
}

pub fn render(ui: &mut egui::Ui, view: &SessionView) -> Option<SidebarAction> {
    let mut action = None;

    ui.heading(format!("Signed in as {}", view.local_user));
    if ui.button("Log out").clicked() {
        action = Some(SidebarAction::Logout);
    }
    ui.separator();

    let group = ConversationKey::Group;
    if ui
        .selectable_label(
            view.selected == group,
            with_unread(group.to_string(), view.group_unread),
        )
        .clicked()
    {
        action = Some(SidebarAction::Select(None));
    }

    ui.separator();
    if view.contacts.is_empty() {
        ui.label("Nobody else is online");
        return action;
    }

    for contact in &view.contacts {
        ui.horizontal(|ui| {
            let dot = if contact.online {
                egui::Color32::GREEN
            } else {
                egui::Color32::GRAY
            };
            ui.colored_label(dot, "●");

            let selected = view.selected.peer() == Some(contact.user.as_str());
            if ui
                .selectable_label(selected, with_unread(contact.user.clone(), contact.unread))
                .clicked()
            {
                action = Some(SidebarAction::Select(Some(contact.user.clone())));
            }
            if contact.typing {
                ui.label(egui::RichText::new("typing...").weak());
            }
        });
    }

    action
}
