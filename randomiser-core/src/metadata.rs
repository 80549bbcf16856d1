use serde::{Deserialize, Deserializer, Serialize};

use crate::Result;

/// Named boolean columns of the per-record info tables.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MetadataColumn {
    Exclude,
    IsBoss,
    IsStarter,
    IsGiftMonster,
    IsGiftIncarnus,
    SwapDrop,
}

impl MetadataColumn {
    pub fn name(self) -> &'static str {
        match self {
            MetadataColumn::Exclude => "exclude",
            MetadataColumn::IsBoss => "is_boss",
            MetadataColumn::IsStarter => "is_starter",
            MetadataColumn::IsGiftMonster => "is_gift_monster",
            MetadataColumn::IsGiftIncarnus => "is_gift_incarnus",
            MetadataColumn::SwapDrop => "swap_drop",
        }
    }
}

/// Read-only per-record flags consulted by the shuffles.
pub trait MetadataProvider {
    fn flag(&self, index: usize, column: MetadataColumn) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataRow {
    #[serde(deserialize_with = "flag_from_cell")]
    pub exclude: bool,
    #[serde(deserialize_with = "flag_from_cell")]
    pub is_boss: bool,
    #[serde(deserialize_with = "flag_from_cell")]
    pub is_starter: bool,
    #[serde(deserialize_with = "flag_from_cell")]
    pub is_gift_monster: bool,
    #[serde(deserialize_with = "flag_from_cell")]
    pub is_gift_incarnus: bool,
    #[serde(deserialize_with = "flag_from_cell")]
    pub swap_drop: bool,
}

impl MetadataRow {
    pub fn get(&self, column: MetadataColumn) -> bool {
        match column {
            MetadataColumn::Exclude => self.exclude,
            MetadataColumn::IsBoss => self.is_boss,
            MetadataColumn::IsStarter => self.is_starter,
            MetadataColumn::IsGiftMonster => self.is_gift_monster,
            MetadataColumn::IsGiftIncarnus => self.is_gift_incarnus,
            MetadataColumn::SwapDrop => self.swap_drop,
        }
    }
}

// The info sheets were maintained by hand with "y" marking a set flag.
#[derive(Deserialize)]
#[serde(untagged)]
enum Cell {
    Bool(bool),
    Text(String),
}

fn flag_from_cell<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let cell = Option::<Cell>::deserialize(deserializer)?;
    Ok(match cell {
        Some(Cell::Bool(b)) => b,
        Some(Cell::Text(s)) => s.trim().eq_ignore_ascii_case("y"),
        None => false,
    })
}

/// In-memory info table, one row per record index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataTable {
    rows: Vec<MetadataRow>,
}

impl MetadataTable {
    pub fn new(rows: Vec<MetadataRow>) -> Self {
        MetadataTable { rows }
    }

    pub fn from_json_str(src: &str) -> Result<Self> {
        Ok(serde_json::from_str(src)?)
    }

    pub fn rows(&self) -> &[MetadataRow] {
        &self.rows
    }
}

impl MetadataProvider for MetadataTable {
    fn flag(&self, index: usize, column: MetadataColumn) -> bool {
        // Rows past the end of the sheet carry no flags.
        self.rows.get(index).map_or(false, |row| row.get(column))
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_y_cells_and_bools() {
        let table = MetadataTable::from_json_str(
            r#"[
                {"exclude": "y", "is_boss": "", "swap_drop": "n"},
                {"is_boss": true, "swap_drop": "Y"},
                {}
            ]"#,
        )
        .unwrap();

        assert_eq!(table.len(), 3);
        assert!(table.flag(0, MetadataColumn::Exclude));
        assert!(!table.flag(0, MetadataColumn::IsBoss));
        assert!(!table.flag(0, MetadataColumn::SwapDrop));
        assert!(table.flag(1, MetadataColumn::IsBoss));
        assert!(table.flag(1, MetadataColumn::SwapDrop));
        assert!(!table.flag(2, MetadataColumn::Exclude));
    }

    #[test]
    fn missing_rows_are_unflagged() {
        let table = MetadataTable::default();
        assert!(table.is_empty());
        assert!(!table.flag(12, MetadataColumn::IsGiftIncarnus));
        assert_eq!(MetadataColumn::IsGiftIncarnus.name(), "is_gift_incarnus");
    }
}
