// Log Line Generator Module
// Provides one generator per supported log line format.

use crate::errors::ModelError;
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, LogNormal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported line encodings, named after the `format` label values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    ApacheCommon,
    ApacheCombined,
    ApacheError,
    Rfc3164,
    Rfc5424,
    CommonLog,
    Json,
    Logfmt,
}

impl LogFormat {
    pub const ALL: [LogFormat; 8] = [
        LogFormat::ApacheCommon,
        LogFormat::ApacheCombined,
        LogFormat::ApacheError,
        LogFormat::Rfc3164,
        LogFormat::Rfc5424,
        LogFormat::CommonLog,
        LogFormat::Json,
        LogFormat::Logfmt,
    ];

    /// Formats enumerated by the stock `format` label.
    pub const DEFAULT_POOL: [LogFormat; 7] = [
        LogFormat::ApacheCommon,
        LogFormat::ApacheCombined,
        LogFormat::ApacheError,
        LogFormat::Rfc3164,
        LogFormat::Rfc5424,
        LogFormat::Json,
        LogFormat::Logfmt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::ApacheCommon => "apache_common",
            LogFormat::ApacheCombined => "apache_combined",
            LogFormat::ApacheError => "apache_error",
            LogFormat::Rfc3164 => "rfc3164",
            LogFormat::Rfc5424 => "rfc5424",
            LogFormat::CommonLog => "common_log",
            LogFormat::Json => "json",
            LogFormat::Logfmt => "logfmt",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ModelError::UnsupportedFormat(s.to_string()))
    }
}

/// Trait for generating synthetic log lines
pub trait LineGenerator: Send + Sync {
    /// Generate one line stamped with `ts`
    fn generate(&self, rng: &mut dyn RngCore, ts: DateTime<Utc>) -> String;

    /// Generate a line of exactly `len` bytes.
    ///
    /// The default truncates (or space-pads) a regular line, which keeps the
    /// prefix of unstructured formats readable.
    fn generate_sized(&self, rng: &mut dyn RngCore, ts: DateTime<Utc>, len: usize) -> String {
        fit(self.generate(rng, ts), len)
    }

    /// The format this generator emits
    fn format(&self) -> LogFormat;
}

/// Truncate or pad `line` to exactly `len` bytes.
fn fit(mut line: String, len: usize) -> String {
    if line.len() > len {
        let mut cut = len;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        line.truncate(cut);
    }
    while line.len() < len {
        line.push(' ');
    }
    line
}

const HTTP_METHODS: &[&str] = &["GET", "GET", "GET", "POST", "POST", "PUT", "PATCH", "DELETE", "HEAD"];
const HTTP_VERSIONS: &[&str] = &["HTTP/1.0", "HTTP/1.1", "HTTP/2.0"];
const STATUS_CODES: &[u16] = &[
    200, 200, 200, 200, 201, 204, 301, 302, 304, 400, 401, 403, 404, 404, 500, 502, 503,
];
const APACHE_LEVELS: &[&str] = &["error", "warn", "notice", "info", "debug", "crit"];

const NOUNS: &[&str] = &[
    "array", "bandwidth", "bus", "capacitor", "card", "circuit", "driver", "feed", "firewall",
    "hard drive", "interface", "matrix", "microchip", "monitor", "panel", "pixel", "port",
    "program", "protocol", "sensor", "system", "transmitter",
];
const ADJECTIVES: &[&str] = &[
    "auxiliary", "back-end", "bluetooth", "cross-platform", "digital", "haptic", "mobile",
    "multi-byte", "neural", "online", "open-source", "optical", "primary", "redundant", "solid state",
    "virtual", "wireless",
];
const VERBS: &[&str] = &[
    "back up", "bypass", "calculate", "compress", "connect", "copy", "generate", "hack",
    "index", "input", "navigate", "override", "parse", "program", "quantify", "reboot",
    "synthesize", "transmit",
];
const BUZZWORDS: &[&str] = &[
    "aggregate", "architect", "benchmark", "deploy", "disintermediate", "empower", "enable",
    "engage", "enhance", "harness", "incentivize", "integrate", "leverage", "monetize",
    "optimize", "orchestrate", "reinvent", "scale", "streamline", "synergize", "transform",
];
const BUZZ_NOUNS: &[&str] = &[
    "action-items", "bandwidth", "channels", "content", "deliverables", "e-markets",
    "experiences", "functionalities", "infrastructures", "interfaces", "markets", "metrics",
    "models", "networks", "paradigms", "platforms", "portals", "schemas", "solutions",
    "supply-chains", "systems", "users", "web-services",
];
const USERS: &[&str] = &[
    "alice", "bob", "carol", "dave", "erin", "frank", "grace", "heidi", "ivan", "judy",
    "mallory", "oscar", "peggy", "trent", "victor", "walter",
];
const TLDS: &[&str] = &["com", "net", "org", "io", "biz", "info"];
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "curl/8.5.0",
    "Go-http-client/1.1",
];

fn pick<'a, T: ?Sized>(rng: &mut dyn RngCore, items: &'a [&'a T]) -> &'a T {
    items.choose(rng).copied().unwrap_or_else(|| items[0])
}

fn ipv4(rng: &mut dyn RngCore) -> String {
    format!(
        "{}.{}.{}.{}",
        rng.random_range(1..=254u8),
        rng.random::<u8>(),
        rng.random::<u8>(),
        rng.random_range(1..=254u8)
    )
}

fn status(rng: &mut dyn RngCore) -> u16 {
    STATUS_CODES.choose(rng).copied().unwrap_or(200)
}

/// Response size of an access log line, roughly log-normal around 2KB.
fn bytes(rng: &mut dyn RngCore) -> u64 {
    match LogNormal::new(7.6, 1.2) {
        Ok(dist) => (dist.sample(rng) as u64).min(1 << 24),
        Err(_) => rng.random_range(0..30_000),
    }
}

fn username(rng: &mut dyn RngCore) -> String {
    format!("{}{}", pick(rng, USERS), rng.random_range(0..100u8))
}

fn auth_user(rng: &mut dyn RngCore) -> String {
    if rng.random_bool(0.5) {
        "-".to_string()
    } else {
        username(rng)
    }
}

fn word(rng: &mut dyn RngCore) -> &'static str {
    pick(rng, NOUNS)
}

fn bs(rng: &mut dyn RngCore) -> String {
    format!("{}-{}", pick(rng, BUZZWORDS), pick(rng, BUZZ_NOUNS))
}

fn resource_uri(rng: &mut dyn RngCore) -> String {
    let segments = rng.random_range(1..=4);
    (0..segments).map(|_| format!("/{}", bs(rng))).collect()
}

fn domain(rng: &mut dyn RngCore) -> String {
    format!("{}.{}", pick(rng, BUZZ_NOUNS), pick(rng, TLDS))
}

fn url(rng: &mut dyn RngCore) -> String {
    format!("https://www.{}{}", domain(rng), resource_uri(rng))
}

fn hacker_phrase(rng: &mut dyn RngCore) -> String {
    format!(
        "If we {} the {}, we can get to the {} {} through the {} {}!",
        pick(rng, VERBS),
        pick(rng, NOUNS),
        pick(rng, ADJECTIVES),
        pick(rng, NOUNS),
        pick(rng, ADJECTIVES),
        pick(rng, NOUNS),
    )
}

/// Apache common / combined access log lines
pub struct AccessLogGenerator {
    format: LogFormat,
}

impl AccessLogGenerator {
    pub fn common() -> Self {
        Self {
            format: LogFormat::ApacheCommon,
        }
    }

    pub fn combined() -> Self {
        Self {
            format: LogFormat::ApacheCombined,
        }
    }

    /// The NCSA common log format, identical in shape to `apache_common`
    pub fn common_log() -> Self {
        Self {
            format: LogFormat::CommonLog,
        }
    }
}

impl LineGenerator for AccessLogGenerator {
    fn generate(&self, rng: &mut dyn RngCore, ts: DateTime<Utc>) -> String {
        let line = format!(
            "{} - {} [{}] \"{} {} {}\" {} {}",
            ipv4(rng),
            auth_user(rng),
            ts.format("%d/%b/%Y:%H:%M:%S %z"),
            pick(rng, HTTP_METHODS),
            resource_uri(rng),
            pick(rng, HTTP_VERSIONS),
            status(rng),
            bytes(rng),
        );
        if self.format == LogFormat::ApacheCombined {
            format!("{} \"{}\" \"{}\"", line, url(rng), pick(rng, USER_AGENTS))
        } else {
            line
        }
    }

    fn format(&self) -> LogFormat {
        self.format
    }
}

/// Apache error log lines
pub struct ApacheErrorGenerator;

impl LineGenerator for ApacheErrorGenerator {
    fn generate(&self, rng: &mut dyn RngCore, ts: DateTime<Utc>) -> String {
        format!(
            "[{}] [{}:{}] [pid {}:tid {}] [client {}:{}] {}",
            ts.format("%a %b %d %H:%M:%S%.6f %Y"),
            word(rng),
            pick(rng, APACHE_LEVELS),
            rng.random_range(1..=10_000),
            rng.random_range(1..=10_000),
            ipv4(rng),
            rng.random_range(1..=65_535),
            hacker_phrase(rng),
        )
    }

    fn format(&self) -> LogFormat {
        LogFormat::ApacheError
    }
}

/// Syslog lines (RFC 3164 or RFC 5424)
pub struct SyslogGenerator {
    format: LogFormat,
}

impl SyslogGenerator {
    pub fn rfc3164() -> Self {
        Self {
            format: LogFormat::Rfc3164,
        }
    }

    pub fn rfc5424() -> Self {
        Self {
            format: LogFormat::Rfc5424,
        }
    }
}

impl LineGenerator for SyslogGenerator {
    fn generate(&self, rng: &mut dyn RngCore, ts: DateTime<Utc>) -> String {
        if self.format == LogFormat::Rfc3164 {
            format!(
                "<{}>{} {} {}[{}]: {}",
                rng.random_range(0..=191),
                ts.format("%b %d %H:%M:%S"),
                username(rng),
                word(rng).replace(' ', "-"),
                rng.random_range(1..=10_000),
                hacker_phrase(rng),
            )
        } else {
            format!(
                "<{}>{} {} {} {} {} ID{} - {}",
                rng.random_range(0..=191),
                rng.random_range(1..=3),
                ts.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                domain(rng),
                word(rng).replace(' ', "-"),
                rng.random_range(1..=10_000),
                rng.random_range(1..=1_000),
                hacker_phrase(rng),
            )
        }
    }

    fn format(&self) -> LogFormat {
        self.format
    }
}

/// Flat JSON access log objects
pub struct JsonGenerator;

impl JsonGenerator {
    /// Length of the smallest object that still carries `status` and `bytes`.
    pub const MIN_STRUCTURED_LEN: usize = r#"{"status":200,"bytes":0,"msg":""}"#.len();
}

impl LineGenerator for JsonGenerator {
    fn generate(&self, rng: &mut dyn RngCore, ts: DateTime<Utc>) -> String {
        serde_json::json!({
            "host": ipv4(rng),
            "user-identifier": auth_user(rng),
            "datetime": ts.format("%d/%b/%Y:%H:%M:%S %z").to_string(),
            "method": pick(rng, HTTP_METHODS),
            "request": resource_uri(rng),
            "protocol": pick(rng, HTTP_VERSIONS),
            "status": status(rng),
            "bytes": bytes(rng),
            "referer": url(rng),
        })
        .to_string()
    }

    fn generate_sized(&self, rng: &mut dyn RngCore, _ts: DateTime<Utc>, len: usize) -> String {
        if len < Self::MIN_STRUCTURED_LEN {
            // too small for a useful record; keep it valid JSON when possible
            return if len >= 2 {
                fit("{}".to_string(), len)
            } else {
                fit(String::new(), len)
            };
        }
        let status = status(rng);
        let head = format!(r#"{{"status":{},"bytes":0,"msg":""#, status);
        // `bytes` is rendered as 0 so the head length stays predictable
        let padding = len.saturating_sub(head.len() + 2);
        fit(format!("{}{}\"}}", head, "x".repeat(padding)), len)
    }

    fn format(&self) -> LogFormat {
        LogFormat::Json
    }
}

/// `key=value` access log lines
pub struct LogfmtGenerator;

impl LogfmtGenerator {
    pub const MIN_STRUCTURED_LEN: usize = r#"status=200 bytes=0 msg="""#.len();
}

impl LineGenerator for LogfmtGenerator {
    fn generate(&self, rng: &mut dyn RngCore, ts: DateTime<Utc>) -> String {
        format!(
            "host=\"{}\" user={} timestamp={} method={} request=\"{}\" protocol={} status={} bytes={} referer=\"{}\"",
            ipv4(rng),
            auth_user(rng),
            ts.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            pick(rng, HTTP_METHODS),
            resource_uri(rng),
            pick(rng, HTTP_VERSIONS),
            status(rng),
            bytes(rng),
            url(rng),
        )
    }

    fn generate_sized(&self, rng: &mut dyn RngCore, _ts: DateTime<Utc>, len: usize) -> String {
        if len < Self::MIN_STRUCTURED_LEN {
            return fit(String::new(), len);
        }
        let head = format!("status={} bytes=0 msg=\"", status(rng));
        let padding = len.saturating_sub(head.len() + 1);
        fit(format!("{}{}\"", head, "x".repeat(padding)), len)
    }

    fn format(&self) -> LogFormat {
        LogFormat::Logfmt
    }
}

/// Factory for creating the generator of a format
pub fn create_line_generator(format: LogFormat) -> Box<dyn LineGenerator> {
    match format {
        LogFormat::ApacheCommon => Box::new(AccessLogGenerator::common()),
        LogFormat::ApacheCombined => Box::new(AccessLogGenerator::combined()),
        LogFormat::CommonLog => Box::new(AccessLogGenerator::common_log()),
        LogFormat::ApacheError => Box::new(ApacheErrorGenerator),
        LogFormat::Rfc3164 => Box::new(SyslogGenerator::rfc3164()),
        LogFormat::Rfc5424 => Box::new(SyslogGenerator::rfc5424()),
        LogFormat::Json => Box::new(JsonGenerator),
        LogFormat::Logfmt => Box::new(LogfmtGenerator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    fn logfmt_fields(line: &str) -> HashMap<String, String> {
        // values never contain spaces outside of quotes in generated lines
        let mut fields = HashMap::new();
        let mut rest = line;
        while let Some(eq) = rest.find('=') {
            let key = rest[..eq].trim().to_string();
            rest = &rest[eq + 1..];
            let (value, tail) = if let Some(stripped) = rest.strip_prefix('"') {
                let end = stripped.find('"').unwrap();
                (&stripped[..end], &stripped[end + 1..])
            } else {
                let end = rest.find(' ').unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            };
            fields.insert(key, value.to_string());
            rest = tail;
        }
        fields
    }

    #[test]
    fn test_format_names_round_trip() {
        for format in LogFormat::ALL {
            assert_eq!(format.as_str().parse::<LogFormat>().unwrap(), format);
            assert_eq!(create_line_generator(format).format(), format);
        }
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_every_generator_produces_output() {
        let mut rng = rng();
        for format in LogFormat::ALL {
            let generator = create_line_generator(format);
            let line = generator.generate(&mut rng, Utc::now());
            assert!(!line.is_empty(), "{format} produced an empty line");
            assert!(!line.contains('\n'));
        }
    }

    #[test]
    fn test_json_line_supports_status_filter() {
        let mut rng = rng();
        for _ in 0..100 {
            let line = JsonGenerator.generate(&mut rng, Utc::now());
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            let status = value["status"].as_u64().unwrap();
            assert!((100..600).contains(&status));
            assert!(value["bytes"].is_u64());
            assert!(value["method"].is_string());
        }
    }

    #[test]
    fn test_logfmt_line_fields() {
        let mut rng = rng();
        let line = LogfmtGenerator.generate(&mut rng, Utc::now());
        let fields = logfmt_fields(&line);
        assert!(fields["status"].parse::<u16>().is_ok());
        assert!(fields["bytes"].parse::<u64>().is_ok());
        assert!(fields.contains_key("method"));
    }

    #[test]
    fn test_sized_lines_have_exact_length() {
        let mut rng = rng();
        for format in LogFormat::ALL {
            let generator = create_line_generator(format);
            for len in [0, 1, 2, 10, 33, 64, 500] {
                let line = generator.generate_sized(&mut rng, Utc::now(), len);
                assert_eq!(line.len(), len, "{format} sized to {len}");
            }
        }
    }

    #[test]
    fn test_sized_json_stays_parseable() {
        let mut rng = rng();
        for len in JsonGenerator::MIN_STRUCTURED_LEN..JsonGenerator::MIN_STRUCTURED_LEN + 50 {
            let line = JsonGenerator.generate_sized(&mut rng, Utc::now(), len);
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert!(value["status"].as_u64().is_some());
        }
        let tiny = JsonGenerator.generate_sized(&mut rng, Utc::now(), 5);
        assert!(serde_json::from_str::<serde_json::Value>(&tiny).is_ok());
    }

    #[test]
    fn test_sized_logfmt_keeps_status() {
        let mut rng = rng();
        let line = LogfmtGenerator.generate_sized(&mut rng, Utc::now(), 80);
        assert_eq!(line.len(), 80);
        let fields = logfmt_fields(&line);
        assert!(fields["status"].parse::<u16>().is_ok());
    }

    #[test]
    fn test_fit() {
        assert_eq!(fit("abcdef".to_string(), 3), "abc");
        assert_eq!(fit("ab".to_string(), 4), "ab  ");
        assert_eq!(fit("ab".to_string(), 0), "");
    }
}
