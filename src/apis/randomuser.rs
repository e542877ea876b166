use crate::error::{EtlError, Result};
use crate::types::{Cell, Column, ColumnType, UserSource, UserTable};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const RANDOMUSER_SOURCE: &str = "randomuser";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

// Leaf deserializers: a wrong type or a null reads as absent instead of
// failing the whole response.

fn lenient<'de, D, T>(d: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(serde_json::from_value(Value::deserialize(d)?).ok())
}

fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_int<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct RandomUserResponse {
    #[serde(default)]
    results: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RandomUser {
    #[serde(deserialize_with = "lenient_text")]
    pub gender: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub name: Option<Name>,
    #[serde(deserialize_with = "lenient")]
    pub location: Option<Location>,
    #[serde(deserialize_with = "lenient_text")]
    pub email: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub login: Option<Login>,
    #[serde(deserialize_with = "lenient")]
    pub dob: Option<Dated>,
    #[serde(deserialize_with = "lenient")]
    pub registered: Option<Dated>,
    #[serde(deserialize_with = "lenient_text")]
    pub phone: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub cell: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub id: Option<Identity>,
    #[serde(deserialize_with = "lenient")]
    pub picture: Option<Picture>,
    #[serde(deserialize_with = "lenient_text")]
    pub nat: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Name {
    #[serde(deserialize_with = "lenient_text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub first: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub last: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Location {
    #[serde(deserialize_with = "lenient")]
    pub street: Option<Street>,
    #[serde(deserialize_with = "lenient_text")]
    pub city: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub state: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub country: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub postcode: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub coordinates: Option<Coordinates>,
    #[serde(deserialize_with = "lenient")]
    pub timezone: Option<Timezone>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Street {
    #[serde(deserialize_with = "lenient_int")]
    pub number: Option<i64>,
    #[serde(deserialize_with = "lenient_text")]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Coordinates {
    #[serde(deserialize_with = "lenient_text")]
    pub latitude: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub longitude: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Timezone {
    #[serde(deserialize_with = "lenient_text")]
    pub offset: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Login {
    #[serde(deserialize_with = "lenient_text")]
    pub uuid: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub username: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub password: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub salt: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub md5: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub sha1: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub sha256: Option<String>,
}

/// `dob` and `registered` share this shape.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Dated {
    #[serde(deserialize_with = "lenient_timestamp")]
    pub date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_int")]
    pub age: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Identity {
    #[serde(deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Picture {
    #[serde(deserialize_with = "lenient_text")]
    pub large: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub medium: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub thumbnail: Option<String>,
}

/// Flattened column layout, parent and child keys joined with `_`.
pub const USER_COLUMNS: [(&str, ColumnType); 34] = [
    ("gender", ColumnType::Text),
    ("name_title", ColumnType::Text),
    ("name_first", ColumnType::Text),
    ("name_last", ColumnType::Text),
    ("location_street_number", ColumnType::Integer),
    ("location_street_name", ColumnType::Text),
    ("location_city", ColumnType::Text),
    ("location_state", ColumnType::Text),
    ("location_country", ColumnType::Text),
    ("location_postcode", ColumnType::Text),
    ("location_coordinates_latitude", ColumnType::Text),
    ("location_coordinates_longitude", ColumnType::Text),
    ("location_timezone_offset", ColumnType::Text),
    ("location_timezone_description", ColumnType::Text),
    ("email", ColumnType::Text),
    ("login_uuid", ColumnType::Text),
    ("login_username", ColumnType::Text),
    ("login_password", ColumnType::Text),
    ("login_salt", ColumnType::Text),
    ("login_md5", ColumnType::Text),
    ("login_sha1", ColumnType::Text),
    ("login_sha256", ColumnType::Text),
    ("dob_date", ColumnType::Text),
    ("dob_age", ColumnType::Integer),
    ("registered_date", ColumnType::Text),
    ("registered_age", ColumnType::Integer),
    ("phone", ColumnType::Text),
    ("cell", ColumnType::Text),
    ("id_name", ColumnType::Text),
    ("id_value", ColumnType::Text),
    ("picture_large", ColumnType::Text),
    ("picture_medium", ColumnType::Text),
    ("picture_thumbnail", ColumnType::Text),
    ("nat", ColumnType::Text),
];

pub fn user_columns() -> Vec<Column> {
    USER_COLUMNS
        .iter()
        .map(|(name, kind)| Column::new(*name, *kind))
        .collect()
}

fn timestamp(value: Option<DateTime<Utc>>) -> Cell {
    value
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .into()
}

/// One flattened user row, in `USER_COLUMNS` order.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    cells: Vec<Cell>,
}

impl UserRecord {
    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }
}

impl From<RandomUser> for UserRecord {
    fn from(user: RandomUser) -> Self {
        let name = user.name.unwrap_or_default();
        let location = user.location.unwrap_or_default();
        let street = location.street.unwrap_or_default();
        let coordinates = location.coordinates.unwrap_or_default();
        let timezone = location.timezone.unwrap_or_default();
        let login = user.login.unwrap_or_default();
        let dob = user.dob.unwrap_or_default();
        let registered = user.registered.unwrap_or_default();
        let id = user.id.unwrap_or_default();
        let picture = user.picture.unwrap_or_default();

        let cells = vec![
            user.gender.into(),
            name.title.into(),
            name.first.into(),
            name.last.into(),
            street.number.into(),
            street.name.into(),
            location.city.into(),
            location.state.into(),
            location.country.into(),
            location.postcode.into(),
            coordinates.latitude.into(),
            coordinates.longitude.into(),
            timezone.offset.into(),
            timezone.description.into(),
            user.email.into(),
            login.uuid.into(),
            login.username.into(),
            login.password.into(),
            login.salt.into(),
            login.md5.into(),
            login.sha1.into(),
            login.sha256.into(),
            timestamp(dob.date),
            dob.age.into(),
            timestamp(registered.date),
            registered.age.into(),
            user.phone.into(),
            user.cell.into(),
            id.name.into(),
            id.value.into(),
            picture.large.into(),
            picture.medium.into(),
            picture.thumbnail.into(),
            user.nat.into(),
        ];
        Self { cells }
    }
}

/// Parses a randomuser.me response body into a flattened table.
///
/// A body that is not JSON, carries an `error`, or has no `results` list is
/// fatal. Individual results that do not match the expected shape still
/// produce a row, with NULL in every unreadable column.
pub fn parse_users(body: &str) -> Result<UserTable> {
    let response: RandomUserResponse = serde_json::from_str(body)?;
    if let Some(error) = response.error {
        let message = match error {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Err(EtlError::Api { message });
    }
    let results = response.results.ok_or_else(|| EtlError::Api {
        message: "response has no results list".to_string(),
    })?;

    let mut table = UserTable::new(user_columns());
    for (i, raw) in results.into_iter().enumerate() {
        let user = serde_json::from_value::<RandomUser>(raw).unwrap_or_else(|e| {
            warn!("Result {} is not a user object ({}); keeping an empty row", i, e);
            RandomUser::default()
        });
        table.push_row(UserRecord::from(user).into_cells());
    }
    Ok(table)
}

pub struct RandomUserApi {
    client: reqwest::Client,
    base_url: String,
}

impl RandomUserApi {
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait::async_trait]
impl UserSource for RandomUserApi {
    fn source_name(&self) -> &'static str {
        RANDOMUSER_SOURCE
    }

    #[instrument(skip(self))]
    async fn fetch_users(&self, count: u32) -> Result<UserTable> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("results", count)])
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        let table = parse_users(&body)?;
        info!("Fetched {} users from {}", table.len(), self.base_url);
        Ok(table)
    }
}
