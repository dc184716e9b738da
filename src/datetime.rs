use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

#[cfg(not(test))]
/// 現在のUTC時間を取得する。
pub fn now() -> DateTime<Utc> {
    Utc::now()
}


#[cfg(test)]
pub use mock_datetime::now;

/// PocketBaseが返す日時文字列をパースする。
///
/// PocketBaseは`2024-01-01 10:00:00.000Z`形式で返すが、RFC 3339形式も受け付ける。
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(s) {
        return Ok(datetime.to_utc());
    }
    let naive = NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), "%Y-%m-%d %H:%M:%S%.f")
        .with_context(|| format!("Failed to parse timestamp: {}", s))?;

    Ok(naive.and_utc())
}

/// 日時をPocketBaseへ送信する文字列に変換する。
pub fn format_timestamp(datetime: &DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `DateTime<Utc>`のserde実装。
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_timestamp(&s).map_err(|e| D::Error::custom(format!("{:#}", e)))
    }
}

/// `Option<DateTime<Utc>>`のserde実装。
///
/// PocketBaseは未設定の日時を空文字列で返すため、空文字列と`null`は`None`として扱う。
pub mod optional_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(datetime) => serializer.serialize_str(&super::format_timestamp(datetime)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) if !s.is_empty() => super::parse_timestamp(&s)
                .map(Some)
                .map_err(|e| D::Error::custom(format!("{:#}", e))),
            _ => Ok(None),
        }
    }
}
