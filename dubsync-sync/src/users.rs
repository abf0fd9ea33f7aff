//! User directory: raw user identifiers → display names.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    names: BTreeMap<String, String>,
}

impl UserDirectory {
    pub fn new(names: BTreeMap<String, String>) -> Self {
        Self {
            names: names
                .into_iter()
                .map(|(id, name)| (normalize(&id), name))
                .collect(),
        }
    }

    /// Display name for `id`; unknown identifiers are shown as-is.
    pub fn display(&self, id: &str) -> String {
        let trimmed = id.trim();
        self.names
            .get(&normalize(trimmed))
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }
}

// Identifiers are email-like; case never distinguishes two users.
fn normalize(id: &str) -> String {
    id.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_case_insensitively_and_falls_back() {
        let mut names = BTreeMap::new();
        names.insert("ana@studio.example".to_string(), "Ana Gil".to_string());
        let users = UserDirectory::new(names);
        assert_eq!(users.display(" ANA@studio.example "), "Ana Gil");
        assert_eq!(users.display("bob@studio.example"), "bob@studio.example");
        assert_eq!(users.display(""), "");
    }
}
