//! Serde helpers for human readable durations (`"500ms"`, `"30s"`, `"1m"`, `"1h"`).

use std::time::Duration;

pub fn parse_duration(s: &str) -> Result<Duration, String> {
	let s = s.trim();
	let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
		Some(idx) => s.split_at(idx),
		None => return Err(format!("missing unit in duration: {s}")),
	};
	let value: u64 = digits
		.parse()
		.map_err(|_| format!("invalid duration: {s}"))?;
	match unit {
		"ms" => Ok(Duration::from_millis(value)),
		"s" => Ok(Duration::from_secs(value)),
		"m" => Ok(Duration::from_secs(value * 60)),
		"h" => Ok(Duration::from_secs(value * 3600)),
		_ => Err(format!("invalid duration unit '{unit}' in: {s}")),
	}
}

pub fn format_duration(d: &Duration) -> String {
	if d.subsec_millis() != 0 || d.as_secs() == 0 {
		format!("{}ms", d.as_millis())
	} else {
		format!("{}s", d.as_secs())
	}
}

pub mod serde_dur {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&super::format_duration(duration))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		super::parse_duration(&s).map_err(serde::de::Error::custom)
	}
}

pub mod serde_dur_option {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match duration {
			Some(d) => serializer.serialize_str(&super::format_duration(d)),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s: Option<String> = Option::deserialize(deserializer)?;
		s.map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
			.transpose()
	}
}
