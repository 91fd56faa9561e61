//! Reversible edits applied to the page while a VIP chapter is captured.
//!
//! Every mutation records its own undo action. [`EditLog::restore`] replays them newest
//! first, and dropping the log restores as well, so the page returns to its original state
//! whichever step of the capture failed.

use kuchikiki::NodeRef;

use crate::site;

enum Undo {
    Style {
        element: NodeRef,
        original: Option<String>,
    },
    Reinsert {
        node: NodeRef,
        parent: NodeRef,
        next_sibling: Option<NodeRef>,
    },
}

#[derive(Default)]
pub struct EditLog {
    undo: Vec<Undo>,
}

impl EditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Sets one inline style declaration, remembering the whole original `style` attribute.
    pub fn set_style_property(&mut self, element: &NodeRef, property: &str, value: &str) -> bool {
        let Some(data) = element.as_element() else {
            return false;
        };

        let mut attributes = data.attributes.borrow_mut();
        let original = attributes.get("style").map(str::to_owned);
        let updated =
            site::with_style_declaration(original.as_deref().unwrap_or(""), property, value);
        attributes.insert("style", updated);

        self.undo.push(Undo::Style {
            element: element.clone(),
            original,
        });
        true
    }

    /// Detaches `node`, remembering its parent and next sibling. Returns false for a node
    /// that is not attached.
    pub fn detach(&mut self, node: &NodeRef) -> bool {
        let Some(parent) = node.parent() else {
            return false;
        };
        let next_sibling = node.next_sibling();
        node.detach();

        self.undo.push(Undo::Reinsert {
            node: node.clone(),
            parent,
            next_sibling,
        });
        true
    }

    pub fn restore(&mut self) {
        while let Some(action) = self.undo.pop() {
            match action {
                Undo::Style { element, original } => {
                    let Some(data) = element.as_element() else {
                        continue;
                    };
                    let mut attributes = data.attributes.borrow_mut();
                    match original {
                        Some(style) => {
                            attributes.insert("style", style);
                        }
                        None => {
                            attributes.remove("style");
                        }
                    }
                }
                Undo::Reinsert {
                    node,
                    parent,
                    next_sibling,
                } => match next_sibling {
                    Some(sibling) if sibling.parent().as_ref() == Some(&parent) => {
                        sibling.insert_before(node);
                    }
                    _ => parent.append(node),
                },
            }
        }
    }
}

impl Drop for EditLog {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            tracing::debug!(pending = self.undo.len(), "restoring page edits on drop");
            self.restore();
        }
    }
}
