//! serde for cycle and per-packet delays
//!
//! Accepts a human readable span (`"1ms"`, `"250us"`) or an integer number of
//! microseconds. Serializes as a span string.
use std::fmt;
use std::time::Duration;

use serde::{de, ser, Deserializer, Serializer};

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct V;

    impl de::Visitor<'_> for V {
        type Value = Duration;

        fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
            fmt.write_str("a duration string or a number of microseconds")
        }

        fn visit_str<E>(self, v: &str) -> Result<Duration, E>
        where
            E: de::Error,
        {
            let dur: jiff::Span = v.parse().map_err(E::custom)?;
            Duration::try_from(dur).map_err(E::custom)
        }

        fn visit_u64<E>(self, v: u64) -> Result<Duration, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_micros(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Duration, E>
        where
            E: de::Error,
        {
            u64::try_from(v)
                .map(Duration::from_micros)
                .map_err(|_| E::custom(format!("negative duration: {v}us")))
        }
    }

    deserializer.deserialize_any(V)
}

pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let dur = jiff::Span::try_from(*value).map_err(ser::Error::custom)?;
    serializer.serialize_str(&format!("{:#}", dur))
}
