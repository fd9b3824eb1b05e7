use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use cinema_schedule::keys;
use cinema_schedule::{DeleteTarget, ScheduleEditor, SessionEdit};
use serde::Deserialize;

/// A hall or format given either by id or by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CatalogRef {
    Id(i64),
    Name(String),
}

impl CatalogRef {
    fn as_input(&self) -> String {
        match self {
            CatalogRef::Id(id) => id.to_string(),
            CatalogRef::Name(name) => name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fields {
    pub time: Option<String>,
    pub hall: Option<CatalogRef>,
    pub format: Option<CatalogRef>,
    pub price: Option<f64>,
    pub vip_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddOp {
    pub date: String,
    #[serde(flatten)]
    pub fields: Fields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditOp {
    pub date: String,
    pub index: usize,
    #[serde(flatten)]
    pub fields: Fields,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteOp {
    pub date: String,
    pub index: usize,
}

/// Session changes for one movie, read from TOML:
///
/// ```toml
/// [[add]]
/// date = "2025-01-10"
/// time = "18:00"
/// hall = "Зала 1"      # name or id
/// format = "3D"
/// price = 150
///
/// [[edit]]
/// date = "2025-01-11"
/// index = 0
/// time = "19:30"
///
/// [[delete]]
/// date = "2025-01-12"
/// index = 1
/// ```
///
/// Indexes address the day's sessions as `schedule show` lists them before
/// the plan runs. Edits are applied first, then deletes, then adds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    #[serde(default)]
    pub add: Vec<AddOp>,
    #[serde(default)]
    pub edit: Vec<EditOp>,
    #[serde(default)]
    pub delete: Vec<DeleteOp>,
}

/// What a plan did to the editor's working copy.
#[derive(Debug, Default)]
pub struct Applied {
    pub added: usize,
    pub edited: usize,
    pub local_deletes: usize,
    /// Saved sessions marked for deletion; bookings are looked up for these.
    pub persisted_deletes: Vec<cinema_models::SessionId>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading plan {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parsing plan {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.edit.is_empty() && self.delete.is_empty()
    }

    pub fn apply(&self, editor: &mut ScheduleEditor) -> Result<Applied> {
        let mut applied = Applied::default();

        for op in &self.edit {
            let date = parse_date(&op.date)?;
            apply_fields(editor, date, op.index, &op.fields)
                .with_context(|| format!("edit #{} on {}", op.index, op.date))?;
            applied.edited += 1;
        }

        // Highest index first so earlier indexes still point at the same session.
        let mut deletes = self
            .delete
            .iter()
            .map(|op| Ok((parse_date(&op.date)?, op.index)))
            .collect::<Result<Vec<_>>>()?;
        deletes.sort_by(|a, b| b.cmp(a));
        deletes.dedup();
        for (date, index) in deletes {
            match editor
                .confirm_delete(date, index)
                .with_context(|| format!("delete #{index} on {}", keys::date_key(date)))?
            {
                DeleteTarget::Local => applied.local_deletes += 1,
                DeleteTarget::Persisted(id) => applied.persisted_deletes.push(id),
            }
        }

        for op in &self.add {
            let date = parse_date(&op.date)?;
            let index = editor.add_slot(date)?;
            apply_fields(editor, date, index, &op.fields)
                .with_context(|| format!("new session on {}", op.date))?;
            applied.added += 1;
        }

        Ok(applied)
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    Ok(keys::parse_date_key(s)?)
}

fn apply_fields(editor: &mut ScheduleEditor, date: NaiveDate, index: usize, fields: &Fields) -> Result<()> {
    let mut edits = Vec::new();
    if let Some(time) = &fields.time {
        edits.push(SessionEdit::Time(keys::parse_time(time)?));
    }
    if let Some(hall) = &fields.hall {
        edits.push(SessionEdit::Hall(editor.catalog().resolve_hall(&hall.as_input())?));
    }
    if let Some(format) = &fields.format {
        edits.push(SessionEdit::Format(editor.catalog().resolve_format(&format.as_input())?));
    }
    if let Some(price) = fields.price {
        edits.push(SessionEdit::Price(price));
    }
    if let Some(price) = fields.vip_price {
        edits.push(SessionEdit::VipPrice(price));
    }
    for edit in edits {
        editor.edit(date, index, edit)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use cinema_models::{FormatId, Hall, HallId, MovieId, RawSession, SessionId, SessionType};
    use cinema_schedule::{Catalog, MovieKey, MovieRef, ScheduleStore, SlotDefaults};

    fn editor(rows: &[RawSession]) -> ScheduleEditor {
        let catalog = Catalog::new(
            vec![
                Hall { id: HallId(1), name: "Зала 1".to_string() },
                Hall { id: HallId(2), name: "IMAX".to_string() },
            ],
            vec![
                SessionType { id: FormatId(1), label: "2D".to_string() },
                SessionType { id: FormatId(2), label: "3D".to_string() },
            ],
        );
        let key = MovieKey::new("Dune").unwrap();
        let mut store = ScheduleStore::new();
        store.load_movie(&key, rows, chrono_tz::Europe::Kyiv).unwrap();
        let defaults = SlotDefaults::from_catalog(&catalog, 120.0, 180.0).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        ScheduleEditor::new(store, MovieRef { id: MovieId(42), key }, catalog, defaults, today)
    }

    fn row(id: i64, date: &str, hall: i64) -> RawSession {
        RawSession {
            id: SessionId(id),
            date: date.to_string(),
            session_type_id: FormatId(1),
            hall_id: HallId(hall),
            price: 120.0,
            price_vip: 180.0,
            movie_id: Some(MovieId(42)),
            is_deleted: false,
        }
    }

    fn day(s: &str) -> NaiveDate {
        keys::parse_date_key(s).unwrap()
    }

    #[test]
    fn parses_names_and_ids() {
        let plan = Plan::parse(
            r#"
[[add]]
date = "2025-01-10"
time = "18:00"
hall = "IMAX"
format = 2
price = 150
vip_price = 250.5
"#,
        )
        .unwrap();
        assert_eq!(plan.add.len(), 1);
        assert!(matches!(plan.add[0].fields.hall, Some(CatalogRef::Name(ref n)) if n == "IMAX"));
        assert!(matches!(plan.add[0].fields.format, Some(CatalogRef::Id(2))));
        assert_eq!(plan.add[0].fields.price, Some(150.0));
    }

    #[test]
    fn rejects_unknown_sections() {
        assert!(Plan::parse("[[move]]\ndate = \"2025-01-10\"\n").is_err());
    }

    #[test]
    fn adds_with_resolved_catalog_entries() {
        let mut editor = editor(&[]);
        let plan = Plan::parse(
            r#"
[[add]]
date = "2025-01-10"
time = "18:00"
hall = "imax"
format = "3D"
"#,
        )
        .unwrap();

        let applied = plan.apply(&mut editor).unwrap();
        assert_eq!(applied.added, 1);

        let sessions = editor.sessions(day("2025-01-10"));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].time, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
        assert_eq!(sessions[0].hall_id, HallId(2));
        assert_eq!(sessions[0].format_id, FormatId(2));
        assert_eq!(sessions[0].price, 120.0);
    }

    #[test]
    fn deletes_use_indexes_from_before_the_plan() {
        let mut editor = editor(&[
            row(1, "2025-01-12T10:00:00", 1),
            row(2, "2025-01-12T14:00:00", 1),
            row(3, "2025-01-12T18:00:00", 1),
        ]);
        let plan = Plan::parse(
            r#"
[[delete]]
date = "2025-01-12"
index = 0

[[delete]]
date = "2025-01-12"
index = 2
"#,
        )
        .unwrap();

        let applied = plan.apply(&mut editor).unwrap();
        assert_eq!(applied.persisted_deletes, vec![SessionId(3), SessionId(1)]);
        let left = editor.sessions(day("2025-01-12"));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id(), Some(SessionId(2)));
    }

    #[test]
    fn unknown_hall_names_the_failing_operation() {
        let mut editor = editor(&[row(1, "2025-01-11T10:00:00", 1)]);
        let plan = Plan::parse(
            r#"
[[edit]]
date = "2025-01-11"
index = 0
hall = "Зала 9"
"#,
        )
        .unwrap();

        let err = plan.apply(&mut editor).unwrap_err();
        assert!(format!("{err:#}").contains("edit #0 on 2025-01-11"));
    }

    #[test]
    fn past_dates_cannot_be_added() {
        let mut editor = editor(&[]);
        let plan = Plan::parse("[[add]]\ndate = \"2025-01-08\"\n").unwrap();
        assert!(plan.apply(&mut editor).is_err());
        assert!(editor.sessions(day("2025-01-08")).is_empty());
    }
}
