use std::fmt;
use std::path::Path;

use serde::Deserialize;
use time::{util::days_in_year_month, Date, Month};
use tracing::debug;

use crate::error::{Error, Result};
use crate::tag::Tag;

/// Which images a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageScope {
    All,
    /// Lowercased image name
    Image(String),
}

impl ImageScope {
    pub fn parse(name: &str) -> Self {
        let name = name.to_lowercase();
        if name == "all" {
            Self::All
        } else {
            Self::Image(name)
        }
    }

    pub fn applies_to(&self, image_name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Image(name) => name.eq_ignore_ascii_case(image_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRule {
    NameContains {
        scope: ImageScope,
        /// Lowercased
        substring: String,
    },
    AgeExceeds {
        scope: ImageScope,
        years: u32,
        /// Always below 12
        months: u32,
    },
}

impl FilterRule {
    pub fn name_contains(scope: ImageScope, substring: &str) -> Self {
        Self::NameContains {
            scope,
            substring: substring.to_lowercase(),
        }
    }

    /// Months of 12 and over are rolled into years.
    pub fn age_exceeds(scope: ImageScope, years: u32, months: u32) -> Self {
        Self::AgeExceeds {
            scope,
            years: years.saturating_add(months / 12),
            months: months % 12,
        }
    }

    pub fn scope(&self) -> &ImageScope {
        match self {
            Self::NameContains { scope, .. } | Self::AgeExceeds { scope, .. } => scope,
        }
    }

    /// Check `tag` against this rule. Returns the reason when the tag matches.
    pub fn evaluate(&self, image_name: &str, tag: &Tag, today: Date) -> Option<String> {
        if !self.scope().applies_to(image_name) {
            return None;
        }

        match self {
            Self::NameContains { substring, .. } => tag
                .name
                .to_lowercase()
                .contains(substring.as_str())
                .then(|| format!("\"{substring}\" in tag name")),
            Self::AgeExceeds { years, months, .. } => {
                // A cutoff before the earliest representable date leaves nothing older
                let cutoff = cutoff_date(today, *years, *months)?;
                let updated = tag.updated_on()?;
                (updated < cutoff).then(|| format!("older than cutoff date {cutoff}"))
            }
        }
    }

    pub fn describe_scope(&self) -> String {
        match self.scope() {
            ImageScope::All => format!("For all images: {self}"),
            ImageScope::Image(name) => format!("For image {name}: {self}"),
        }
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameContains { substring, .. } => {
                write!(f, "Tags with names containing the string \"{substring}\"")
            }
            Self::AgeExceeds { years, months, .. } => {
                write!(f, "Tags more than {years} year(s) and {months} month(s) old")
            }
        }
    }
}

/// `today` moved back by `years` and `months`.
///
/// When the day of month doesn't exist in the target month it is clamped to
/// the month's last day, so going back one month from March 31st lands on
/// the last day of February.
///
/// `None` when the result lies before the earliest date `time` can represent.
pub fn cutoff_date(today: Date, years: u32, months: u32) -> Option<Date> {
    let back = i64::from(years) * 12 + i64::from(months);
    let total = i64::from(today.year()) * 12 + (today.month() as i64 - 1) - back;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = Month::try_from(u8::try_from(total.rem_euclid(12) + 1).ok()?).ok()?;
    let day = today.day().min(days_in_year_month(year, month));

    Date::from_calendar_date(year, month, day).ok()
}

/// A tag together with the reason the first matching rule gave, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatedTag {
    pub tag: Tag,
    pub reason: Option<String>,
}

impl EvaluatedTag {
    pub fn matched(&self) -> bool {
        self.reason.is_some()
    }
}

/// Reason of the first rule, in order, that matches the tag.
pub fn first_match(rules: &[FilterRule], tag: &Tag, today: Date) -> Option<String> {
    rules
        .iter()
        .find_map(|rule| rule.evaluate(&tag.image_name, tag, today))
}

pub fn evaluate_all(tags: Vec<Tag>, rules: &[FilterRule], today: Date) -> Vec<EvaluatedTag> {
    tags.into_iter()
        .map(|tag| {
            let reason = first_match(rules, &tag, today);
            EvaluatedTag { tag, reason }
        })
        .collect()
}

/// Only the rules scoped to all images or to one of `images`.
pub fn rules_for_images(rules: Vec<FilterRule>, images: &[String]) -> Vec<FilterRule> {
    rules
        .into_iter()
        .filter(|rule| match rule.scope() {
            ImageScope::All => true,
            ImageScope::Image(name) => images.iter().any(|x| x.eq_ignore_ascii_case(name)),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Number {
    Int(u32),
    Text(String),
}

impl Number {
    fn value(&self, field: &str) -> Result<u32> {
        match self {
            Self::Int(x) => Ok(*x),
            Self::Text(x) => x
                .trim()
                .parse()
                .map_err(|e| Error::config_with_source(format!("Invalid value for {field}: {x}"), e)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleRecord {
    image_name: String,
    #[serde(rename = "type")]
    kind: String,
    string: Option<String>,
    years: Option<Number>,
    months: Option<Number>,
}

impl TryFrom<RuleRecord> for FilterRule {
    type Error = Error;

    fn try_from(record: RuleRecord) -> Result<Self> {
        let scope = ImageScope::parse(&record.image_name);
        match record.kind.to_lowercase().replace('-', "_").as_str() {
            "tag_name" => {
                let substring = record
                    .string
                    .ok_or_else(|| Error::config("A tag_name filter requires the \"string\" field"))?;
                Ok(Self::name_contains(scope, &substring))
            }
            "time_based" => {
                let years = record
                    .years
                    .ok_or_else(|| Error::config("A time_based filter requires the \"years\" field"))?
                    .value("years")?;
                let months = record
                    .months
                    .ok_or_else(|| Error::config("A time_based filter requires the \"months\" field"))?
                    .value("months")?;
                Ok(Self::age_exceeds(scope, years, months))
            }
            _ => Err(Error::config(format!("Invalid tag filter type: {}", record.kind))),
        }
    }
}

pub fn parse_rules(json: &str) -> Result<Vec<FilterRule>> {
    let records: Vec<RuleRecord> = serde_json::from_str(json)
        .map_err(|e| Error::config_with_source("Malformed tag deletion criteria", e))?;
    records.into_iter().map(FilterRule::try_from).collect()
}

pub fn load_rules(path: &Path) -> Result<Vec<FilterRule>> {
    debug!("Loading tag deletion criteria from {}", path.display());
    let json = std::fs::read_to_string(path).map_err(|e| {
        Error::config_with_source(format!("Unable to read tag deletion criteria from {}", path.display()), e)
    })?;
    parse_rules(&json)
}
