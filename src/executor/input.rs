// Native input injection. enigo runs on a blocking thread per call.
use async_trait::async_trait;
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::agent_engine::response::ScrollDirection;
use crate::errors::{VisorError, VisorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[async_trait]
pub trait NativeInput: Send + Sync {
    async fn click(&self, x: i32, y: i32, button: MouseButton) -> VisorResult<()>;
    async fn scroll(&self, direction: ScrollDirection, amount: i32) -> VisorResult<()>;
    async fn type_text(&self, text: &str) -> VisorResult<()>;
    async fn key_press(&self, key: &str, modifiers: &[String]) -> VisorResult<()>;
}

#[derive(Debug, Default)]
pub struct EnigoInput;

impl EnigoInput {
    pub fn new() -> Self {
        Self
    }

    async fn with_enigo<F>(op: &'static str, f: F) -> VisorResult<()>
    where
        F: FnOnce(&mut Enigo) -> VisorResult<()> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut enigo = Enigo::new(&Settings::default())
                .map_err(|e| VisorError::ActionExecution(format!("{op}: enigo init: {e}")))?;
            f(&mut enigo)
        })
        .await
        .map_err(|e| VisorError::ActionExecution(format!("{op}: join: {e}")))?
    }
}

fn input_err(op: &str, e: impl std::fmt::Display) -> VisorError {
    VisorError::ActionExecution(format!("{op}: {e}"))
}

#[async_trait]
impl NativeInput for EnigoInput {
    async fn click(&self, x: i32, y: i32, button: MouseButton) -> VisorResult<()> {
        let btn = match button {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
            MouseButton::Middle => Button::Middle,
        };
        Self::with_enigo("click", move |enigo| {
            enigo.move_mouse(x, y, Coordinate::Abs).map_err(|e| input_err("move", e))?;
            enigo.button(btn, Direction::Click).map_err(|e| input_err("click", e))
        })
        .await
    }

    async fn scroll(&self, direction: ScrollDirection, amount: i32) -> VisorResult<()> {
        // enigo: positive lengths scroll down / right.
        let (length, axis) = match direction {
            ScrollDirection::Up => (-amount, Axis::Vertical),
            ScrollDirection::Down => (amount, Axis::Vertical),
            ScrollDirection::Left => (-amount, Axis::Horizontal),
            ScrollDirection::Right => (amount, Axis::Horizontal),
        };
        Self::with_enigo("scroll", move |enigo| {
            enigo.scroll(length, axis).map_err(|e| input_err("scroll", e))
        })
        .await
    }

    async fn type_text(&self, text: &str) -> VisorResult<()> {
        let text = text.to_string();
        Self::with_enigo("type", move |enigo| {
            enigo.text(&text).map_err(|e| input_err("type", e))
        })
        .await
    }

    async fn key_press(&self, key: &str, modifiers: &[String]) -> VisorResult<()> {
        let main = map_key(key)?;
        let mods = modifiers
            .iter()
            .map(|m| map_key(m))
            .collect::<VisorResult<Vec<Key>>>()?;
        Self::with_enigo("key", move |enigo| {
            for m in &mods {
                enigo.key(*m, Direction::Press).map_err(|e| input_err("key", e))?;
            }
            let result = enigo.key(main, Direction::Click).map_err(|e| input_err("key", e));
            // Release modifiers even if the main key failed.
            for m in mods.iter().rev() {
                if let Err(e) = enigo.key(*m, Direction::Release) {
                    tracing::warn!(error = %e, "modifier release failed");
                }
            }
            result
        })
        .await
    }
}

pub fn map_key(key: &str) -> VisorResult<Key> {
    let k = match key.to_lowercase().as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "escape" | "esc" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "space" => Key::Space,
        "control" | "ctrl" => Key::Control,
        "shift" => Key::Shift,
        "alt" | "option" => Key::Alt,
        "meta" | "cmd" | "command" | "super" | "win" | "windows" => Key::Meta,
        "up" | "arrowup" => Key::UpArrow,
        "down" | "arrowdown" => Key::DownArrow,
        "left" | "arrowleft" => Key::LeftArrow,
        "right" | "arrowright" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        _ => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => return Err(VisorError::ActionExecution(format!("unsupported key: {key}"))),
            }
        }
    };
    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_are_case_insensitive() {
        assert!(matches!(map_key("Enter"), Ok(Key::Return)));
        assert!(matches!(map_key("CTRL"), Ok(Key::Control)));
        assert!(matches!(map_key("cmd"), Ok(Key::Meta)));
        assert!(matches!(map_key("PageDown"), Ok(Key::PageDown)));
    }

    #[test]
    fn single_characters_are_unicode() {
        assert!(matches!(map_key("a"), Ok(Key::Unicode('a'))));
        assert!(matches!(map_key("é"), Ok(Key::Unicode('é'))));
    }

    #[test]
    fn unknown_names_fail() {
        assert!(matches!(map_key("hyper"), Err(VisorError::ActionExecution(_))));
    }
}
