//! CSV tables: the training table (one row per player per match, labelled)
//! and batch uploads (same schema without the label).

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use ndarray::Array1;
use serde::{Deserialize, Deserializer};

use crate::{FeatureError, Result, REQUIRED_BATCH_COLUMNS, STAT_COLUMNS, TRAINING_ONLY_COLUMNS};

/// One player's line of a match, as found in batch uploads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerRow {
    #[serde(default)]
    pub match_id: Option<i64>,
    #[serde(default)]
    pub account_id: Option<i64>,
    pub hero_name: String,
    #[serde(rename = "isRadiant", deserialize_with = "flexible_bool")]
    pub is_radiant: bool,
    pub kills: f64,
    pub deaths: f64,
    pub assists: f64,
    pub gold_per_min: f64,
    pub xp_per_min: f64,
    pub hero_damage: f64,
    pub hero_healing: f64,
    pub net_worth: f64,
    pub level: f64,
    pub duration: f64,
}

impl PlayerRow {
    /// Stat values in [`STAT_COLUMNS`] order.
    pub fn stats(&self) -> [f64; 9] {
        [
            self.kills,
            self.deaths,
            self.assists,
            self.gold_per_min,
            self.xp_per_min,
            self.hero_damage,
            self.hero_healing,
            self.net_worth,
            self.level,
        ]
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.hero_name.is_empty() {
            return Err("hero_name is empty".into());
        }
        for (name, value) in STAT_COLUMNS.iter().zip(self.stats()) {
            if !value.is_finite() {
                return Err(format!("{name} is not a finite number"));
            }
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err("duration must be a non-negative number".into());
        }
        Ok(())
    }
}

/// A labelled training row.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub match_id: i64,
    pub account_id: i64,
    pub radiant_win: bool,
    pub player: PlayerRow,
}

impl MatchRecord {
    /// Whether this player's side won the match.
    pub fn player_won(&self) -> bool {
        self.player.is_radiant == self.radiant_win
    }
}

#[derive(Deserialize)]
struct LabelColumns {
    match_id: i64,
    account_id: i64,
    #[serde(deserialize_with = "flexible_bool")]
    radiant_win: bool,
}

/// The reference training table.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<MatchRecord>,
}

impl Dataset {
    pub fn from_records(records: Vec<MatchRecord>) -> Self {
        Self { records }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(csv::Error::from)?;
        let dataset = Self::from_reader(file)?;
        tracing::info!(
            path = %path.display(),
            rows = dataset.len(),
            accounts = dataset.account_ids().len(),
            "training table loaded"
        );
        Ok(dataset)
    }

    /// Parse a training table. Every row must parse or the whole load fails.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers = reader.headers()?.clone();
        let required: Vec<&str> = REQUIRED_BATCH_COLUMNS
            .iter()
            .chain(TRAINING_ONLY_COLUMNS.iter())
            .copied()
            .collect();
        check_columns(&headers, &required)?;

        let mut records = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let row = idx + 1;
            let raw = result?;
            let player = parse_player(&raw, &headers, row)?;
            let labels: LabelColumns = raw
                .deserialize(Some(&headers))
                .map_err(|e| row_error(row, e))?;
            records.push(MatchRecord {
                match_id: labels.match_id,
                account_id: labels.account_id,
                radiant_win: labels.radiant_win,
                player: PlayerRow {
                    match_id: Some(labels.match_id),
                    account_id: Some(labels.account_id),
                    ..player
                },
            });
        }

        Ok(Self { records })
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    /// The records at `rows`, in that order. Out-of-range indices are skipped.
    pub fn subset(&self, rows: &[usize]) -> Dataset {
        Self::from_records(rows.iter().filter_map(|&i| self.records.get(i).cloned()).collect())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Binary targets: 1.0 when Radiant won the row's match.
    pub fn labels(&self) -> Array1<f64> {
        self.records
            .iter()
            .map(|r| if r.radiant_win { 1.0 } else { 0.0 })
            .collect()
    }

    /// Sorted, de-duplicated account ids present in the table.
    pub fn account_ids(&self) -> Vec<i64> {
        self.records
            .iter()
            .map(|r| r.account_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Parse a batch upload. All-or-nothing: a missing column, an unparseable
/// cell or an empty upload rejects the whole batch.
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<PlayerRow>> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(bytes);
    let headers = reader.headers()?.clone();
    check_columns(&headers, &REQUIRED_BATCH_COLUMNS)?;

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let raw = result.map_err(|e| row_error(idx + 1, e))?;
        rows.push(parse_player(&raw, &headers, idx + 1)?);
    }

    if rows.is_empty() {
        return Err(FeatureError::Empty);
    }
    Ok(rows)
}

fn parse_player(raw: &StringRecord, headers: &StringRecord, row: usize) -> Result<PlayerRow> {
    let player: PlayerRow = raw
        .deserialize(Some(headers))
        .map_err(|e| row_error(row, e))?;
    player
        .validate()
        .map_err(|message| FeatureError::Row { row, message })?;
    Ok(player)
}

fn check_columns(headers: &StringRecord, required: &[&str]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FeatureError::MissingColumns(missing))
    }
}

fn row_error(row: usize, err: csv::Error) -> FeatureError {
    let message = match err.kind() {
        csv::ErrorKind::Deserialize { err, .. } => match err.field() {
            Some(field) => format!("column {}: {}", field + 1, err.kind()),
            None => err.kind().to_string(),
        },
        _ => err.to_string(),
    };
    FeatureError::Row { row, message }
}

fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim() {
        "true" | "True" | "TRUE" | "1" => Ok(true),
        "false" | "False" | "FALSE" | "0" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid boolean '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "match_id,account_id,hero_name,isRadiant,kills,deaths,assists,gold_per_min,xp_per_min,hero_damage,hero_healing,net_worth,level,duration,radiant_win";

    fn training_csv(rows: &[&str]) -> String {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text
    }

    #[test]
    fn loads_training_table() {
        let text = training_csv(&[
            "1,100,Pudge,True,5,2,10,450,500,12000,0,15000,20,2400,True",
            "1,200,Axe,False,3,6,4,380,420,9000,0,11000,18,2400,True",
            "2,100,Lion,1,1,8,12,250,300,6000,500,7000,15,1800,0",
        ]);
        let ds = Dataset::from_reader(text.as_bytes()).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.account_ids(), vec![100, 200]);
        assert_eq!(ds.labels().to_vec(), vec![1.0, 1.0, 0.0]);

        let first = &ds.records()[0];
        assert!(first.player.is_radiant);
        assert!(first.player_won());
        assert_eq!(first.player.account_id, Some(100));
        assert!(!ds.records()[1].player_won());
    }

    #[test]
    fn training_table_requires_label() {
        let text = "account_id,hero_name,isRadiant,kills,deaths,assists,gold_per_min,xp_per_min,hero_damage,hero_healing,net_worth,level,duration\n\
                    100,Pudge,true,5,2,10,450,500,12000,0,15000,20,2400";
        let err = Dataset::from_reader(text.as_bytes()).unwrap_err();
        match err {
            FeatureError::MissingColumns(cols) => {
                assert_eq!(cols, vec!["match_id".to_string(), "radiant_win".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn training_row_error_is_numbered() {
        let text = training_csv(&[
            "1,100,Pudge,True,5,2,10,450,500,12000,0,15000,20,2400,True",
            "1,200,Axe,maybe,3,6,4,380,420,9000,0,11000,18,2400,True",
        ]);
        let err = Dataset::from_reader(text.as_bytes()).unwrap_err();
        assert!(matches!(err, FeatureError::Row { row: 2, .. }), "{err}");
    }

    #[test]
    fn batch_ignores_label_and_extra_columns() {
        let text = "hero_name,isRadiant,kills,deaths,assists,gold_per_min,xp_per_min,hero_damage,hero_healing,net_worth,level,duration,radiant_win,notes\n\
                    Pudge,true,5,2,10,450,500,12000,0,15000,20,2400,true,hello\n\
                    Axe,false,3,6,4,380,420,9000,0,11000,18,2400,true,";
        let rows = parse_batch(text.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].hero_name, "Pudge");
        assert_eq!(rows[0].account_id, None);
        assert!(!rows[1].is_radiant);
        assert_eq!(rows[1].stats()[3], 380.0);
    }

    #[test]
    fn batch_missing_columns_are_named() {
        let text = "hero_name,isRadiant,kills\nPudge,true,5";
        let err = parse_batch(text.as_bytes()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("deaths"));
        assert!(message.contains("duration"));
        assert!(!message.contains("kills,"));
    }

    #[test]
    fn batch_bad_cell_fails_whole_upload() {
        let text = "hero_name,isRadiant,kills,deaths,assists,gold_per_min,xp_per_min,hero_damage,hero_healing,net_worth,level,duration\n\
                    Pudge,true,5,2,10,450,500,12000,0,15000,20,2400\n\
                    Axe,false,three,6,4,380,420,9000,0,11000,18,2400";
        let err = parse_batch(text.as_bytes()).unwrap_err();
        assert!(matches!(err, FeatureError::Row { row: 2, .. }), "{err}");
    }

    #[test]
    fn batch_rejects_non_finite_values() {
        let text = "hero_name,isRadiant,kills,deaths,assists,gold_per_min,xp_per_min,hero_damage,hero_healing,net_worth,level,duration\n\
                    Pudge,true,NaN,2,10,450,500,12000,0,15000,20,2400";
        let err = parse_batch(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("kills"), "{err}");
    }

    #[test]
    fn empty_batch_is_rejected() {
        let text = "hero_name,isRadiant,kills,deaths,assists,gold_per_min,xp_per_min,hero_damage,hero_healing,net_worth,level,duration\n";
        let err = parse_batch(text.as_bytes()).unwrap_err();
        assert!(matches!(err, FeatureError::Empty));
    }

    #[test]
    fn subset_keeps_requested_rows() {
        let ds = Dataset::from_reader(
            training_csv(&[
                "1,10,Axe,true,1,1,1,400,400,10000,0,12000,18,2000,true",
                "1,11,Lion,false,2,2,2,300,300,8000,0,9000,15,2000,true",
                "2,12,Zeus,true,3,3,3,500,500,20000,0,15000,20,2500,false",
            ])
            .as_bytes(),
        )
        .unwrap();
        let picked = ds.subset(&[2, 0, 7]);
        let ids: Vec<i64> = picked.records().iter().map(|r| r.account_id).collect();
        assert_eq!(ids, vec![12, 10]);
    }

    #[test]
    fn from_path_reads_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("matches.csv");
        std::fs::write(
            &path,
            training_csv(&["3,400,Sven,true,4,4,4,400,400,10000,0,12000,19,2100,true"]),
        )
        .unwrap();
        let ds = Dataset::from_path(&path).unwrap();
        assert_eq!(ds.len(), 1);
    }
}
