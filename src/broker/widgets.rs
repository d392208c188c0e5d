//! Live widget windows, tracked by generated id.
//!
//! Widgets belong to the host, not to the process that created them, so
//! they survive that process exiting.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Widget {
    pub id: String,
    pub title: String,
    pub html: String,
    /// pid of the script that opened it
    pub owner: u32,
}

#[derive(Debug, Default)]
pub struct WidgetRegistry {
    widgets: Mutex<HashMap<String, Widget>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new widget and return its id
    pub fn create(&self, owner: u32, title: &str, html: &str) -> Widget {
        let widget = Widget {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            html: html.to_string(),
            owner,
        };
        self.widgets
            .lock()
            .insert(widget.id.clone(), widget.clone());
        widget
    }

    /// Replace a widget's content; false if the id is unknown
    pub fn update(&self, id: &str, html: &str) -> bool {
        match self.widgets.lock().get_mut(id) {
            Some(widget) => {
                widget.html = html.to_string();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<Widget> {
        self.widgets.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Widget> {
        self.widgets.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.widgets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_update_remove() {
        let widgets = WidgetRegistry::new();
        let widget = widgets.create(10, "Clock", "<p>12:00</p>");
        assert_eq!(widgets.len(), 1);
        assert!(Uuid::parse_str(&widget.id).is_ok());

        assert!(widgets.update(&widget.id, "<p>12:01</p>"));
        assert_eq!(widgets.get(&widget.id).unwrap().html, "<p>12:01</p>");

        assert!(widgets.remove(&widget.id).is_some());
        assert!(widgets.remove(&widget.id).is_none());
        assert!(widgets.is_empty());
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let widgets = WidgetRegistry::new();
        assert!(!widgets.update("nope", "<p/>"));
        assert!(widgets.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let widgets = WidgetRegistry::new();
        let a = widgets.create(1, "", "a");
        let b = widgets.create(1, "", "b");
        assert_ne!(a.id, b.id);
    }
}
