//! Applying components to text content.

use super::operation::Component;

/// Result of applying components with bounds clamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Content after every component was applied.
    pub content: String,
    /// Components as actually applied, with clamped bounds.
    pub components: Vec<Component>,
    /// True if any component had to be clamped into range.
    pub clamped: bool,
}

/// Byte offset of the char at `char_pos`, or the end of the text.
fn byte_offset(text: &str, char_pos: usize) -> usize {
    text.char_indices()
        .nth(char_pos)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// Apply components in order, clamping any out-of-range bounds.
///
/// Concurrent deletes can leave a rebased position past the end of the
/// content; such components are clamped instead of rejected.
pub fn apply_components(content: &str, components: &[Component]) -> Applied {
    let mut text = content.to_string();
    let mut char_len = text.chars().count();
    let mut applied = Vec::with_capacity(components.len());
    let mut clamped = false;

    for component in components {
        match component {
            Component::Insert {
                position,
                content: inserted,
            } => {
                let position = if *position > char_len {
                    clamped = true;
                    char_len
                } else {
                    *position
                };
                text.insert_str(byte_offset(&text, position), inserted);
                char_len += inserted.chars().count();
                applied.push(Component::insert(position, inserted.clone()));
            }
            Component::Delete { position, length } => {
                let start = (*position).min(char_len);
                let end = position.saturating_add(*length).min(char_len);
                if start != *position || end - start != *length {
                    clamped = true;
                }
                let from = byte_offset(&text, start);
                let to = byte_offset(&text, end);
                text.replace_range(from..to, "");
                char_len -= end - start;
                applied.push(Component::delete(start, end - start));
            }
        }
    }

    Applied {
        content: text,
        components: applied,
        clamped,
    }
}

/// Apply components that are known to be in range.
///
/// Returns `None` if any component falls outside the content, which for a
/// committed operation means the stored history does not match its content.
pub fn apply_exact(content: &str, components: &[Component]) -> Option<String> {
    let applied = apply_components(content, components);
    (!applied.clamped).then_some(applied.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_delete() {
        let applied = apply_components(
            "Hello",
            &[Component::insert(5, " World"), Component::delete(0, 6)],
        );
        assert_eq!(applied.content, "World");
        assert!(!applied.clamped);
    }

    #[test]
    fn test_multibyte_positions_count_chars() {
        let applied = apply_components("héllo", &[Component::insert(2, "ü")]);
        assert_eq!(applied.content, "héüllo");

        let applied = apply_components("日本語", &[Component::delete(1, 1)]);
        assert_eq!(applied.content, "日語");
    }

    #[test]
    fn test_clamps_out_of_range_insert() {
        let applied = apply_components("abc", &[Component::insert(10, "d")]);
        assert_eq!(applied.content, "abcd");
        assert!(applied.clamped);
        assert_eq!(applied.components, vec![Component::insert(3, "d")]);
    }

    #[test]
    fn test_clamps_out_of_range_delete() {
        let applied = apply_components("abcdef", &[Component::delete(4, 10)]);
        assert_eq!(applied.content, "abcd");
        assert!(applied.clamped);
        assert_eq!(applied.components, vec![Component::delete(4, 2)]);

        let applied = apply_components("abc", &[Component::delete(7, 2)]);
        assert_eq!(applied.content, "abc");
        assert_eq!(applied.components, vec![Component::delete(3, 0)]);
    }

    #[test]
    fn test_apply_exact_rejects_out_of_range() {
        assert_eq!(
            apply_exact("abc", &[Component::delete(1, 1)]).as_deref(),
            Some("ac")
        );
        assert_eq!(apply_exact("abc", &[Component::delete(2, 5)]), None);
    }
}
