use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Display colour for one label, written as `#RRGGBB` or `#RRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LabelColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl LabelColor {
    pub fn as_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl FromStr for LabelColor {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let hex = value
            .trim()
            .strip_prefix('#')
            .ok_or_else(|| anyhow!("color '{value}' must start with '#'"))?;
        if !matches!(hex.len(), 6 | 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("color '{value}' must be #RRGGBB or #RRGGBBAA");
        }

        let channel = |index: usize| u8::from_str_radix(&hex[index..index + 2], 16);
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: if hex.len() == 8 { channel(6)? } else { 255 },
        })
    }
}

impl TryFrom<String> for LabelColor {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<LabelColor> for String {
    fn from(value: LabelColor) -> Self {
        value.to_string()
    }
}

impl Display for LabelColor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

/// Palette and descriptive metadata attached to one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaletteRecord {
    pub label_colors: BTreeMap<u8, LabelColor>,
    pub art_info: Value,
    pub image_id: String,
}

/// Stored row shape, shared by the catalog file and the REST table.
#[derive(Debug, Clone, Deserialize)]
pub struct PaletteRow {
    pub image_id: String,
    #[serde(default)]
    pub display_month: Option<u32>,
    #[serde(default)]
    pub display_day: Option<u32>,
    #[serde(default, deserialize_with = "null_as_empty_palette")]
    pub palette: BTreeMap<u8, LabelColor>,
    #[serde(default)]
    pub art_info: Value,
}

/// Nullable table columns come back as an explicit `null`.
fn null_as_empty_palette<'de, D>(deserializer: D) -> Result<BTreeMap<u8, LabelColor>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<BTreeMap<u8, LabelColor>>::deserialize(deserializer)?.unwrap_or_default())
}

impl PaletteRow {
    fn matches(&self, query: &PaletteQuery) -> bool {
        match query {
            PaletteQuery::Date { month, day } => {
                self.display_month == Some(*month) && self.display_day == Some(*day)
            }
            PaletteQuery::ImageId(image_id) => self.image_id == *image_id,
        }
    }

    fn into_record(self) -> PaletteRecord {
        PaletteRecord {
            label_colors: self.palette,
            art_info: self.art_info,
            image_id: self.image_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaletteQuery {
    /// Palette scheduled for a calendar day (month 1-12, day 1-31).
    Date { month: u32, day: u32 },
    ImageId(String),
}

impl PaletteQuery {
    pub fn today() -> Self {
        let now = chrono::Local::now();
        Self::Date {
            month: now.month(),
            day: now.day(),
        }
    }

    /// Parse `MM-DD`.
    pub fn parse_date(value: &str) -> Result<Self> {
        let (month, day) = value
            .split_once('-')
            .ok_or_else(|| anyhow!("date '{value}' must be formatted as MM-DD"))?;
        let month: u32 = month
            .trim()
            .parse()
            .with_context(|| format!("invalid month in '{value}'"))?;
        let day: u32 = day
            .trim()
            .parse()
            .with_context(|| format!("invalid day in '{value}'"))?;
        // Leap year so 02-29 is accepted.
        if chrono::NaiveDate::from_ymd_opt(2024, month, day).is_none() {
            bail!("date '{value}' is not a valid calendar day");
        }
        Ok(Self::Date { month, day })
    }
}

impl Display for PaletteQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Date { month, day } => write!(f, "{month:02}-{day:02}"),
            Self::ImageId(image_id) => write!(f, "image '{image_id}'"),
        }
    }
}

/// Lookup of palette records. No match is `Ok(None)`, an expected outcome
/// on days without a scheduled palette.
pub trait PaletteSource {
    fn lookup(&self, query: &PaletteQuery) -> Result<Option<PaletteRecord>>;
}

/// When several rows match, the last one wins.
fn select_last(rows: impl IntoIterator<Item = PaletteRow>, query: &PaletteQuery) -> Option<PaletteRecord> {
    rows.into_iter()
        .filter(|row| row.matches(query))
        .last()
        .map(PaletteRow::into_record)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default)]
    palettes: Vec<PaletteRow>,
}

/// Palette rows loaded from a YAML (or JSON) file.
#[derive(Debug, Clone, Default)]
pub struct PaletteCatalog {
    rows: Vec<PaletteRow>,
}

impl PaletteCatalog {
    pub fn new(rows: Vec<PaletteRow>) -> Self {
        Self { rows }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read palette catalog {}", path.display()))?;
        let catalog: CatalogFile = serde_yaml::from_str(&contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(
                "failed to parse palette catalog {} at {}: {}",
                path.display(),
                location,
                error
            )
        })?;

        for row in &catalog.palettes {
            match (row.display_month, row.display_day) {
                (Some(month), Some(day)) => {
                    if chrono::NaiveDate::from_ymd_opt(2024, month, day).is_none() {
                        bail!(
                            "palette for '{}' is scheduled on invalid day {month:02}-{day:02}",
                            row.image_id
                        );
                    }
                }
                (None, None) => {}
                _ => bail!(
                    "palette for '{}' must set both display_month and display_day, or neither",
                    row.image_id
                ),
            }
        }

        Ok(Self::new(catalog.palettes))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl PaletteSource for PaletteCatalog {
    fn lookup(&self, query: &PaletteQuery) -> Result<Option<PaletteRecord>> {
        let record = select_last(self.rows.iter().cloned(), query);
        log::debug!(
            "palette lookup for {query}: {}",
            if record.is_some() { "found" } else { "none" }
        );
        Ok(record)
    }
}

#[cfg(feature = "remote")]
pub use remote::RestPaletteSource;

#[cfg(feature = "remote")]
mod remote {
    use anyhow::{Context, Result};
    use reqwest::blocking::Client;
    use url::Url;

    use super::{select_last, PaletteQuery, PaletteRecord, PaletteRow, PaletteSource};

    /// Palette rows served by a PostgREST-style table endpoint.
    #[derive(Debug, Clone)]
    pub struct RestPaletteSource {
        http: Client,
        base_url: Url,
        api_key: String,
        table: String,
    }

    impl RestPaletteSource {
        pub fn new(http: Client, base_url: Url, api_key: String, table: impl Into<String>) -> Self {
            Self {
                http,
                base_url,
                api_key,
                table: table.into(),
            }
        }

        fn table_url(&self, query: &PaletteQuery) -> Result<Url> {
            let mut url = self.base_url.clone();
            url.path_segments_mut()
                .map_err(|_| anyhow::anyhow!("'{}' cannot be used as a base url", self.base_url))?
                .pop_if_empty()
                .extend(["rest", "v1", self.table.as_str()]);
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("select", "*");
                match query {
                    PaletteQuery::Date { month, day } => {
                        pairs.append_pair("display_month", &format!("eq.{month}"));
                        pairs.append_pair("display_day", &format!("eq.{day}"));
                    }
                    PaletteQuery::ImageId(image_id) => {
                        pairs.append_pair("image_id", &format!("eq.{image_id}"));
                    }
                }
            }
            Ok(url)
        }
    }

    impl PaletteSource for RestPaletteSource {
        fn lookup(&self, query: &PaletteQuery) -> Result<Option<PaletteRecord>> {
            let rows: Vec<PaletteRow> = self
                .http
                .get(self.table_url(query)?)
                .header("apikey", &self.api_key)
                .bearer_auth(&self.api_key)
                .send()
                .context("failed to call palette table API")?
                .error_for_status()
                .context("palette table API returned an error status")?
                .json()
                .context("failed to decode palette rows")?;
            Ok(select_last(rows, query))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(image_id: &str, month: Option<u32>, day: Option<u32>) -> PaletteRow {
        PaletteRow {
            image_id: image_id.to_owned(),
            display_month: month,
            display_day: day,
            palette: BTreeMap::from([(1, "#ff0000".parse().expect("valid color"))]),
            art_info: json!({ "title": image_id }),
        }
    }

    #[test]
    fn color_parses_rgb_and_rgba() {
        let rgb: LabelColor = "#10a0ff".parse().expect("rgb should parse");
        assert_eq!(rgb.as_rgba(), [0x10, 0xa0, 0xff, 255]);
        let rgba: LabelColor = "#10a0ff80".parse().expect("rgba should parse");
        assert_eq!(rgba.a, 0x80);
        assert_eq!(rgba.to_string(), "#10a0ff80");
        assert!("10a0ff".parse::<LabelColor>().is_err());
        assert!("#12345".parse::<LabelColor>().is_err());
        assert!("#gg0000".parse::<LabelColor>().is_err());
    }

    #[test]
    fn date_lookup_returns_last_matching_row() {
        let catalog = PaletteCatalog::new(vec![
            row("first", Some(3), Some(14)),
            row("other-day", Some(3), Some(15)),
            row("second", Some(3), Some(14)),
        ]);
        let record = catalog
            .lookup(&PaletteQuery::Date { month: 3, day: 14 })
            .expect("lookup should succeed")
            .expect("record should exist");
        assert_eq!(record.image_id, "second");
        assert_eq!(record.art_info, json!({ "title": "second" }));
    }

    #[test]
    fn missing_record_is_none_not_error() {
        let catalog = PaletteCatalog::new(vec![row("test", None, None)]);
        let record = catalog
            .lookup(&PaletteQuery::Date { month: 1, day: 1 })
            .expect("lookup should succeed");
        assert!(record.is_none());

        let by_id = catalog
            .lookup(&PaletteQuery::ImageId("test".to_owned()))
            .expect("lookup should succeed");
        assert!(by_id.is_some());
    }

    #[test]
    fn null_palette_column_decodes_as_empty() {
        let rows: Vec<PaletteRow> = serde_json::from_str(
            r#"[{"image_id":"test","palette":null,"art_info":null,"display_month":null}]"#,
        )
        .expect("null columns should decode");
        let record = select_last(rows, &PaletteQuery::ImageId("test".to_owned()))
            .expect("row should match");
        assert!(record.label_colors.is_empty());
        assert!(record.art_info.is_null());

        let rows: Vec<PaletteRow> =
            serde_json::from_str(r##"[{"image_id":"x","palette":{"3":"#00ff00"}}]"##)
                .expect("string keys should decode");
        assert_eq!(rows[0].palette[&3].as_rgba(), [0, 255, 0, 255]);
    }

    #[test]
    fn parse_date_validates_calendar_days() {
        assert_eq!(
            PaletteQuery::parse_date("02-29").expect("leap day is allowed"),
            PaletteQuery::Date { month: 2, day: 29 }
        );
        assert!(PaletteQuery::parse_date("13-01").is_err());
        assert!(PaletteQuery::parse_date("04-31").is_err());
        assert!(PaletteQuery::parse_date("0401").is_err());
    }
}
