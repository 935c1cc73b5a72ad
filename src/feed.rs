// 📡 Cert Feed Client - authoritative member data from the network
//
// The feed answers GET {base}{kind}.php?cid={id} with a small XML document:
//
//   <root>
//     <user cid="1234567">
//       <name_last>Doe</name_last>
//       <name_first>Jane</name_first>
//       <email>[hidden]</email>
//       <rating>3</rating>
//       <regdate>2012-05-01 18:22:10</regdate>
//       <pilotrating>1</pilotrating>
//       <region>EUR</region>
//       <division>GBR</division>
//     </user>
//   </root>
//
// Upstream data is not guaranteed clean: empty elements count as absent and
// only the rating is required.

use crate::error::FeedError;
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Email the feed publishes for accounts that no longer exist
pub const REDACTED_EMAIL: &str = "[hidden]";

// ============================================================================
// RECORD KINDS & RAW DOCUMENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Current status: names, email, ratings, region/division
    Status,

    /// Rating held before the current (instructor+) rating
    PreviousRating,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Status => "idstatusint",
            RecordKind::PreviousRating => "idstatusprat",
        }
    }
}

/// Flat field map of the feed's `<user>` element
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDocument {
    fields: HashMap<String, String>,
}

impl FeedDocument {
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        FeedDocument {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Field value, or None when missing or blank
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn get_int(&self, field: &'static str) -> Result<Option<i32>, FeedError> {
        self.get(field)
            .map(|raw| {
                raw.parse::<i32>().map_err(|e| FeedError::Malformed {
                    field,
                    reason: format!("{raw:?}: {e}"),
                })
            })
            .transpose()
    }
}

/// Parse a feed response body into its `<user>` fields
pub fn parse_feed_xml(xml: &str) -> Result<FeedDocument, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = HashMap::new();
    let mut in_user = false;
    let mut saw_user = false;
    let mut current: Option<(String, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "user" {
                    in_user = true;
                    saw_user = true;
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"cid" {
                            let value = attr.unescape_value().unwrap_or_default();
                            fields.insert("cid".to_string(), value.into_owned());
                        }
                    }
                } else if in_user {
                    current = Some((name, String::new()));
                }
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "user" {
                    saw_user = true;
                } else if in_user {
                    fields.insert(name, String::new());
                }
            }
            Ok(Event::Text(e)) => {
                if let Some((_, text)) = current.as_mut() {
                    let value = e.unescape().map_err(|e| FeedError::Parse(e.to_string()))?;
                    text.push_str(&value);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some((_, text)) = current.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"user" {
                    in_user = false;
                } else if let Some((name, text)) = current.take() {
                    fields.insert(name, text);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(FeedError::Parse(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }

    if !saw_user {
        return Err(FeedError::Malformed {
            field: "user",
            reason: "response has no <user> element".to_string(),
        });
    }

    Ok(FeedDocument::from_fields(fields))
}

// ============================================================================
// EXTERNAL RECORD
// ============================================================================

/// Snapshot of a member's status on the network
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalRecord {
    pub member_id: i64,
    pub name_first: Option<String>,
    pub name_last: Option<String>,
    pub email: Option<String>,
    /// ATC rating code; -1 inactive, 0 suspended
    pub rating: i32,
    /// Pilot rating bitmask
    pub pilot_rating: i32,
    pub registered_at: Option<DateTime<Utc>>,
    pub region: Option<String>,
    pub division: Option<String>,
}

/// Outcome of a status lookup
#[derive(Debug, Clone, PartialEq)]
pub enum StatusLookup {
    Found(ExternalRecord),
    /// The account no longer exists upstream
    Removed,
}

impl ExternalRecord {
    pub fn from_document(member_id: i64, doc: &FeedDocument) -> Result<StatusLookup, FeedError> {
        let name_first = doc.get("name_first").map(str::to_string);
        let name_last = doc.get("name_last").map(str::to_string);
        let email = doc.get("email").map(str::to_string);

        if name_first.is_none() && name_last.is_none() && email.as_deref() == Some(REDACTED_EMAIL) {
            return Ok(StatusLookup::Removed);
        }

        let rating = doc.get_int("rating")?.ok_or(FeedError::Malformed {
            field: "rating",
            reason: "missing".to_string(),
        })?;

        let registered_at = doc.get("regdate").and_then(|raw| {
            let parsed = parse_regdate(raw);
            if parsed.is_none() {
                debug!(member_id, regdate = raw, "Ignoring unparseable registration date");
            }
            parsed
        });

        Ok(StatusLookup::Found(ExternalRecord {
            member_id,
            name_first,
            name_last,
            email,
            rating,
            pilot_rating: doc.get_int("pilotrating")?.unwrap_or(0),
            registered_at,
            region: doc.get("region").map(str::to_string),
            division: doc.get("division").map(str::to_string),
        }))
    }

    pub fn is_suspended(&self) -> bool {
        self.rating == crate::classifier::SUSPENDED_RATING
    }
}

fn parse_regdate(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

// ============================================================================
// CLIENT
// ============================================================================

/// Source of feed documents. One request per call; callers decide on retries.
pub trait FeedClient {
    fn fetch(&self, member_id: i64, kind: RecordKind) -> Result<FeedDocument, FeedError>;

    fn fetch_status(&self, member_id: i64) -> Result<StatusLookup, FeedError> {
        let doc = self.fetch(member_id, RecordKind::Status)?;
        ExternalRecord::from_document(member_id, &doc)
    }

    fn fetch_previous_rating(&self, member_id: i64) -> Result<Option<i32>, FeedError> {
        let doc = self.fetch(member_id, RecordKind::PreviousRating)?;
        doc.get_int("PreviousRatingInt")
    }
}

impl<T: FeedClient + ?Sized> FeedClient for &T {
    fn fetch(&self, member_id: i64, kind: RecordKind) -> Result<FeedDocument, FeedError> {
        (**self).fetch(member_id, kind)
    }
}

/// Blocking HTTP client for the cert feed
pub struct HttpFeedClient {
    base_url: String,
    http_client: reqwest::blocking::Client,
}

impl HttpFeedClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        let mut base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(FeedError::Transport("feed base URL must not be empty".to_string()));
        }
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let http_client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    pub fn url_for(&self, member_id: i64, kind: RecordKind) -> String {
        format!("{}{}.php?cid={}", self.base_url, kind.as_str(), member_id)
    }
}

impl FeedClient for HttpFeedClient {
    fn fetch(&self, member_id: i64, kind: RecordKind) -> Result<FeedDocument, FeedError> {
        let url = self.url_for(member_id, kind);
        debug!(member_id, %url, "Fetching cert record");

        let body = self
            .http_client
            .get(&url)
            .send()?
            .error_for_status()?
            .text()?;

        parse_feed_xml(&body)
    }
}

// ============================================================================
// IN-MEMORY FEED (tests)
// ============================================================================
