use eframe::egui;

/// What happened in the input bar this frame.
#[derive(Debug, Default)]
pub struct InputOutcome {
    pub submitted: Option<String>,
    pub changed: bool,
}

pub fn render(ui: &mut egui::Ui, input_text: &mut String, enabled: bool) -> InputOutcome {
    let mut outcome = InputOutcome::default();
    let mut send = false;
    ui.horizontal(|ui| {
        let response = ui.text_edit_singleline(input_text);
        outcome.changed = response.changed();
        if ui.add_enabled(enabled, egui::Button::new("Send")).clicked() {
            send = true;
        }

        if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
            send = true;
            response.request_focus();
        }
    });

    if send && enabled && !input_text.trim().is_empty() {
        outcome.submitted = Some(input_text.clone());
        input_text.clear();
    }

    outcome
}
