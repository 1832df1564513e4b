use crate::perception::types::UIElement;

/// One line per element, index-aligned with the labeled overlay:
/// `ID: 3 | Type: icon | Interactive: yes | Content: "Send"`.
pub fn format_ui_context(elements: &[UIElement]) -> String {
    if elements.is_empty() {
        return "No UI elements detected.".to_string();
    }
    elements
        .iter()
        .map(|e| {
            format!(
                "ID: {} | Type: {} | Interactive: {} | Content: \"{}\"",
                e.index,
                e.kind.as_str(),
                if e.interactive { "yes" } else { "no" },
                e.content.replace('\n', " ").replace('"', "'"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
