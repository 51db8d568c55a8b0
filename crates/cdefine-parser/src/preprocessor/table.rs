//! Definition Table
//!
//! Insertion-ordered macro table with a scoped overlay for temporary
//! definitions.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use cdefine_core::Definition;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Table errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("token '{0}' is not defined")]
    NotFound(String),
}

impl From<TableError> for cdefine_core::Error {
    fn from(err: TableError) -> Self {
        match err {
            TableError::NotFound(name) => cdefine_core::Error::NotFound(name),
        }
    }
}

/// Ordered name -> definition map.
///
/// Removal leaves a hole in the slot vector so both insert and remove stay
/// O(1); holes are compacted once they outnumber live entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Definition>", into = "Vec<Definition>")]
pub struct DefinitionTable {
    slots: Vec<Option<Definition>>,
    index: HashMap<String, usize>,
}

impl DefinitionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a macro
    pub fn insert(&mut self, name: &str, params: Option<Vec<String>>, token: &str) {
        self.insert_definition(Definition {
            name: name.to_string(),
            params,
            token: token.to_string(),
            location: None,
        });
    }

    /// Insert or replace a full definition, returning the one it replaced.
    ///
    /// A replaced entry keeps its position.
    pub fn insert_definition(&mut self, def: Definition) -> Option<Definition> {
        match self.index.get(&def.name) {
            Some(&slot) => self.slots[slot].replace(def),
            None => {
                self.index.insert(def.name.clone(), self.slots.len());
                self.slots.push(Some(def));
                None
            }
        }
    }

    /// Remove a macro
    pub fn remove(&mut self, name: &str) -> Result<Definition, TableError> {
        let slot = self
            .index
            .remove(name)
            .ok_or_else(|| TableError::NotFound(name.to_string()))?;
        let removed = self.slots[slot]
            .take()
            .ok_or_else(|| TableError::NotFound(name.to_string()))?;

        if self.slots.len() > 32 && self.index.len() * 2 < self.slots.len() {
            self.compact();
        }
        Ok(removed)
    }

    /// Look up a macro
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.index
            .get(name)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Definitions in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.slots.iter().flatten()
    }

    /// Macro names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|d| d.name.as_str())
    }

    /// Drop every definition
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    /// Layer `defs` over the table until the returned guard is dropped.
    ///
    /// On drop every overridden name gets its prior definition back and
    /// every new name is removed again.
    pub fn scoped<I>(&mut self, defs: I) -> ScopedDefines<'_>
    where
        I: IntoIterator<Item = Definition>,
    {
        let mut saved = Vec::new();
        for def in defs {
            let name = def.name.clone();
            let prior = self.insert_definition(def);
            saved.push((name, prior));
        }
        ScopedDefines { table: self, saved }
    }

    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        for (slot, def) in self.slots.iter().enumerate() {
            if let Some(def) = def {
                self.index.insert(def.name.clone(), slot);
            }
        }
    }
}

impl Extend<Definition> for DefinitionTable {
    fn extend<T: IntoIterator<Item = Definition>>(&mut self, iter: T) {
        for def in iter {
            self.insert_definition(def);
        }
    }
}

impl FromIterator<Definition> for DefinitionTable {
    fn from_iter<T: IntoIterator<Item = Definition>>(iter: T) -> Self {
        let mut table = Self::new();
        table.extend(iter);
        table
    }
}

impl From<Vec<Definition>> for DefinitionTable {
    fn from(defs: Vec<Definition>) -> Self {
        defs.into_iter().collect()
    }
}

impl From<DefinitionTable> for Vec<Definition> {
    fn from(table: DefinitionTable) -> Self {
        table.slots.into_iter().flatten().collect()
    }
}

/// Guard returned by [`DefinitionTable::scoped`]
pub struct ScopedDefines<'a> {
    table: &'a mut DefinitionTable,
    saved: Vec<(String, Option<Definition>)>,
}

impl ScopedDefines<'_> {
    /// Names layered by this scope
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.saved.iter().map(|(name, _)| name.as_str())
    }
}

impl Deref for ScopedDefines<'_> {
    type Target = DefinitionTable;

    fn deref(&self) -> &DefinitionTable {
        &*self.table
    }
}

impl DerefMut for ScopedDefines<'_> {
    fn deref_mut(&mut self) -> &mut DefinitionTable {
        &mut *self.table
    }
}

impl Drop for ScopedDefines<'_> {
    fn drop(&mut self) {
        // Reverse order so a name layered twice ends at its original value
        for (name, prior) in self.saved.drain(..).rev() {
            match prior {
                Some(def) => {
                    self.table.insert_definition(def);
                }
                None => {
                    let _ = self.table.remove(&name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_replaces_in_place() {
        let mut table = DefinitionTable::new();
        table.insert("A", None, "1");
        table.insert("B", None, "2");
        table.insert("A", None, "3");

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("A").unwrap().token, "3");
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_remove() {
        let mut table = DefinitionTable::new();
        table.insert("A", None, "1");
        table.insert("B", None, "2");

        assert_eq!(table.remove("A").unwrap().token, "1");
        assert!(!table.contains("A"));
        assert_eq!(table.remove("A"), Err(TableError::NotFound("A".into())));

        table.insert("A", None, "4");
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["B", "A"]);
    }

    #[test]
    fn test_compaction_keeps_order() {
        let mut table = DefinitionTable::new();
        for i in 0..100 {
            table.insert(&format!("M{}", i), None, &i.to_string());
        }
        for i in 0..90 {
            table.remove(&format!("M{}", i)).unwrap();
        }
        let names: Vec<_> = table.names().map(String::from).collect();
        let expected: Vec<_> = (90..100).map(|i| format!("M{}", i)).collect();
        assert_eq!(names, expected);
        assert_eq!(table.get("M95").unwrap().token, "95");
    }

    #[test]
    fn test_scoped_defines_restore() {
        let mut table = DefinitionTable::new();
        table.insert("KEEP", None, "1");
        table.insert("OVER", None, "old");

        {
            let scope = table.scoped(vec![
                Definition::object("OVER", "new"),
                Definition::object("TEMP", "7"),
            ]);
            assert_eq!(scope.get("OVER").unwrap().token, "new");
            assert_eq!(scope.get("TEMP").unwrap().token, "7");
            assert_eq!(scope.names().collect::<Vec<_>>(), vec!["OVER", "TEMP"]);
        }

        assert_eq!(table.get("OVER").unwrap().token, "old");
        assert!(!table.contains("TEMP"));
        assert_eq!(table.get("KEEP").unwrap().token, "1");
    }

    #[test]
    fn test_serde_keeps_order() {
        let mut table = DefinitionTable::new();
        table.insert("Z", None, "1");
        table.insert("A", Some(vec!["x".into()]), "x");

        let json = serde_json::to_string(&table).unwrap();
        let back: DefinitionTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["Z", "A"]);
        assert_eq!(back.get("A").unwrap().params, Some(vec!["x".to_string()]));
    }
}
