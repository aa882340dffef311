use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use time::OffsetDateTime;

use crate::filter::EvaluatedTag;
use crate::tag::Tag;

#[derive(Tabled)]
struct TagRow {
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Tag")]
    tag: String,
    #[tabled(rename = "Digest")]
    digest: String,
    #[tabled(rename = "Last Updated")]
    last_updated: String,
    #[tabled(rename = "Age")]
    age: String,
}

impl TagRow {
    fn new(tag: &Tag, now: OffsetDateTime) -> Self {
        Self {
            image: tag.image_name.clone(),
            tag: tag.name.clone(),
            digest: tag.digest_prefix.clone(),
            last_updated: tag.fmt_last_updated(),
            age: tag.fmt_age(now),
        }
    }
}

#[derive(Tabled)]
struct EvaluatedTagRow {
    #[tabled(inline)]
    tag: TagRow,
    #[tabled(rename = "Cause for Deletion")]
    cause: String,
}

#[derive(Tabled)]
struct ArchiveRow {
    #[tabled(rename = "Tag")]
    tag: String,
    #[tabled(rename = "ID")]
    id: String,
}

pub fn tag_table(tags: &[Tag], now: OffsetDateTime) -> String {
    let rows = tags.iter().map(|x| TagRow::new(x, now));
    Table::new(rows).with(Style::empty()).to_string()
}

/// Flagged tags are printed red, the rest green.
pub fn evaluated_tag_table(tags: &[EvaluatedTag], now: OffsetDateTime) -> String {
    let rows = tags.iter().map(|x| {
        let row = EvaluatedTagRow {
            tag: TagRow::new(&x.tag, now),
            cause: x.reason.clone().unwrap_or_default(),
        };
        if x.matched() {
            paint(row, |s| s.red().to_string())
        } else {
            paint(row, |s| s.green().to_string())
        }
    });
    Table::new(rows).with(Style::empty()).to_string()
}

fn paint(row: EvaluatedTagRow, color: impl Fn(&str) -> String) -> EvaluatedTagRow {
    EvaluatedTagRow {
        tag: TagRow {
            image: color(&row.tag.image),
            tag: color(&row.tag.tag),
            digest: color(&row.tag.digest),
            last_updated: color(&row.tag.last_updated),
            age: color(&row.tag.age),
        },
        cause: color(&row.cause),
    }
}

/// `(tag, short id)` pairs about to be archived.
pub fn archive_table(rows: &[(String, String)]) -> String {
    let rows = rows.iter().map(|(tag, id)| ArchiveRow {
        tag: tag.clone(),
        id: id.clone(),
    });
    Table::new(rows).with(Style::empty()).to_string()
}
