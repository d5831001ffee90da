use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::api::LiveViewConfig;
use crate::classify::SeverityThresholds;
use crate::detect::PredictParams;
use crate::ingest::SourceConfig;
use crate::pipeline::{InferenceMode, DEFAULT_RETRY_DELAY, MAX_SETTLING_DELAY};
use crate::roles::RoleAssignment;
use crate::transport::{parse_mqtt_endpoint, MqttSettings, MqttTopics, SnapshotConfig, TlsMaterials};

const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_MINOR_PERCENT: f64 = 10.0;
const DEFAULT_SEVERE_PERCENT: f64 = 15.0;
const DEFAULT_INTERVAL_SECS: u64 = 7;
const DEFAULT_SETTLING_DELAY_MS: u64 = 2000;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_IOU: f32 = 0.5;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_TRIGGER_TOKEN: &str = "detect";
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5000;
const DEFAULT_REFERENCE: [&str; 1] = ["Apple"];
const DEFAULT_UNCONDITIONAL: [&str; 2] = ["Bruise", "rotten"];
const DEFAULT_AREA: [&str; 4] = ["Black Dot", "dent", "scratch", "unriped"];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InspectorConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    roles: Option<RolesConfigFile>,
    thresholds: Option<ThresholdsConfigFile>,
    mode: Option<ModeConfigFile>,
    mqtt: Option<MqttConfigFile>,
    http: Option<HttpConfigFile>,
    snapshots: Option<SnapshotsConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    class_names: Option<Vec<String>>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RolesConfigFile {
    reference: Option<Vec<String>>,
    unconditional_defect: Option<Vec<String>>,
    area_defect: Option<Vec<String>>,
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ThresholdsConfigFile {
    minor_percent: Option<f64>,
    severe_percent: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModeConfigFile {
    kind: Option<String>,
    interval_secs: Option<u64>,
    settling_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    ca_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    status_topic: Option<String>,
    details_topic: Option<String>,
    verdict_topic: Option<String>,
    trigger_topic: Option<String>,
    availability_topic: Option<String>,
    trigger_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    endpoint: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotsConfigFile {
    dir: Option<PathBuf>,
    image_base_url: Option<String>,
    always: Option<bool>,
    max_files: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    addr: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeKind {
    Interval,
    Triggered,
}

impl FromStr for ModeKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "interval" => Ok(ModeKind::Interval),
            "triggered" | "trigger" => Ok(ModeKind::Triggered),
            other => Err(format!(
                "unknown inference mode '{}'; expected interval or triggered",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModeSettings {
    pub kind: ModeKind,
    pub interval: Duration,
    pub settling_delay: Duration,
}

impl ModeSettings {
    pub fn inference_mode(&self) -> InferenceMode {
        match self.kind {
            ModeKind::Interval => InferenceMode::Interval {
                period: self.interval,
            },
            ModeKind::Triggered => InferenceMode::Triggered {
                settling_delay: self.settling_delay,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    /// Class table for model backends, indexed by class id.
    pub class_names: Option<Vec<String>>,
    pub predict: PredictParams,
    pub input_width: u32,
    pub input_height: u32,
}

impl DetectorSettings {
    pub fn class_table(&self) -> Option<BTreeMap<u32, String>> {
        self.class_names.as_ref().map(|names| {
            names
                .iter()
                .enumerate()
                .map(|(id, name)| (id as u32, name.clone()))
                .collect()
        })
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdSettings {
    pub minor_percent: f64,
    pub severe_percent: f64,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub ca_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    pub topics: MqttTopics,
    pub trigger_token: String,
}

impl MqttConfig {
    /// Resolve the broker address and read TLS materials from disk.
    pub fn settings(&self) -> Result<MqttSettings> {
        let endpoint = parse_mqtt_endpoint(&self.broker, self.use_tls)?;
        let tls = TlsMaterials::load(
            self.ca_path.as_deref(),
            self.client_cert_path.as_deref(),
            self.client_key_path.as_deref(),
        )?;
        Ok(MqttSettings {
            endpoint,
            tls,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            topics: self.topics.clone(),
            trigger_token: self.trigger_token.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct InspectorConfig {
    pub source: SourceConfig,
    pub retry_delay: Duration,
    pub detector: DetectorSettings,
    pub roles: RoleAssignment,
    pub thresholds: ThresholdSettings,
    pub mode: ModeSettings,
    pub mqtt: Option<MqttConfig>,
    pub http: Option<HttpSettings>,
    pub snapshots: Option<SnapshotConfig>,
    pub stream: LiveViewConfig,
}

impl InspectorConfig {
    /// Load from the file named by `INSPECTOR_CONFIG` (if set), then apply
    /// `INSPECTOR_*` overrides and validate.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like `load`, but an explicit path takes precedence over `INSPECTOR_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var("INSPECTOR_CONFIG")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: InspectorConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source_defaults = SourceConfig::default();
        let source = SourceConfig {
            url: source_file.url.unwrap_or(source_defaults.url),
            target_fps: source_file.target_fps.unwrap_or(source_defaults.target_fps),
            width: source_file.width.unwrap_or(source_defaults.width),
            height: source_file.height.unwrap_or(source_defaults.height),
        };
        let retry_delay = source_file
            .retry_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_DELAY);

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            model_path: detector_file.model_path,
            class_names: detector_file.class_names,
            predict: PredictParams {
                confidence_threshold: detector_file
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE),
                iou_threshold: detector_file.iou_threshold.unwrap_or(DEFAULT_IOU),
            },
            input_width: detector_file.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
            input_height: detector_file.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
        };

        let roles_file = file.roles.unwrap_or_default();
        let roles = RoleAssignment {
            reference: roles_file
                .reference
                .unwrap_or_else(|| to_strings(&DEFAULT_REFERENCE)),
            unconditional_defect: roles_file
                .unconditional_defect
                .unwrap_or_else(|| to_strings(&DEFAULT_UNCONDITIONAL)),
            area_defect: roles_file
                .area_defect
                .unwrap_or_else(|| to_strings(&DEFAULT_AREA)),
            labels: roles_file.labels.unwrap_or_default(),
        };

        let thresholds_file = file.thresholds.unwrap_or_default();
        let thresholds = ThresholdSettings {
            minor_percent: thresholds_file
                .minor_percent
                .unwrap_or(DEFAULT_MINOR_PERCENT),
            severe_percent: thresholds_file
                .severe_percent
                .unwrap_or(DEFAULT_SEVERE_PERCENT),
        };

        let mode_file = file.mode.unwrap_or_default();
        let mode = ModeSettings {
            kind: match mode_file.kind.as_deref() {
                Some(kind) => kind.parse().map_err(|e: String| anyhow!(e))?,
                None => ModeKind::Interval,
            },
            interval: Duration::from_secs(mode_file.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS)),
            settling_delay: Duration::from_millis(
                mode_file
                    .settling_delay_ms
                    .unwrap_or(DEFAULT_SETTLING_DELAY_MS),
            ),
        };

        let mqtt = file.mqtt.and_then(|mqtt| {
            let broker = mqtt.broker?;
            let defaults = MqttTopics::default();
            Some(MqttConfig {
                broker,
                client_id: mqtt.client_id.unwrap_or_else(default_client_id),
                username: mqtt.username,
                password: mqtt.password,
                use_tls: mqtt.use_tls.unwrap_or(false),
                ca_path: mqtt.ca_path,
                client_cert_path: mqtt.client_cert_path,
                client_key_path: mqtt.client_key_path,
                topics: MqttTopics {
                    status: mqtt.status_topic.unwrap_or(defaults.status),
                    details: mqtt.details_topic.unwrap_or(defaults.details),
                    verdict: mqtt.verdict_topic.unwrap_or(defaults.verdict),
                    trigger: mqtt.trigger_topic.unwrap_or(defaults.trigger),
                    availability: mqtt.availability_topic.unwrap_or(defaults.availability),
                },
                trigger_token: mqtt
                    .trigger_token
                    .unwrap_or_else(|| DEFAULT_TRIGGER_TOKEN.to_string()),
            })
        });

        let http = file.http.and_then(|http| {
            Some(HttpSettings {
                endpoint: http.endpoint?,
                timeout: Duration::from_millis(http.timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS)),
            })
        });

        let snapshots = file.snapshots.map(|snapshots| {
            let defaults = SnapshotConfig::default();
            SnapshotConfig {
                dir: snapshots.dir.unwrap_or(defaults.dir),
                image_base_url: snapshots.image_base_url,
                always: snapshots.always.unwrap_or(defaults.always),
                max_files: snapshots.max_files.unwrap_or(defaults.max_files),
                jpeg_quality: defaults.jpeg_quality,
            }
        });

        let stream_file = file.stream.unwrap_or_default();
        let stream_defaults = LiveViewConfig::default();
        let stream = LiveViewConfig {
            addr: stream_file.addr.unwrap_or(stream_defaults.addr),
            jpeg_quality: stream_file
                .jpeg_quality
                .unwrap_or(stream_defaults.jpeg_quality),
            max_fps: stream_defaults.max_fps,
        };

        Ok(Self {
            source,
            retry_delay,
            detector,
            roles,
            thresholds,
            mode,
            mqtt,
            http,
            snapshots,
            stream,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("INSPECTOR_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(backend) = env_value("INSPECTOR_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_value("INSPECTOR_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(mode) = env_value("INSPECTOR_MODE") {
            self.mode.kind = mode.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Some(secs) = env_value("INSPECTOR_INTERVAL_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("INSPECTOR_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.mode.interval = Duration::from_secs(secs);
        }
        if let Some(ms) = env_value("INSPECTOR_SETTLING_DELAY_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                anyhow!("INSPECTOR_SETTLING_DELAY_MS must be an integer number of milliseconds")
            })?;
            self.mode.settling_delay = Duration::from_millis(ms);
        }
        if let Some(minor) = env_value("INSPECTOR_MINOR_PERCENT") {
            self.thresholds.minor_percent = minor
                .parse()
                .map_err(|_| anyhow!("INSPECTOR_MINOR_PERCENT must be a number"))?;
        }
        if let Some(severe) = env_value("INSPECTOR_SEVERE_PERCENT") {
            self.thresholds.severe_percent = severe
                .parse()
                .map_err(|_| anyhow!("INSPECTOR_SEVERE_PERCENT must be a number"))?;
        }
        if let Some(broker) = env_value("INSPECTOR_MQTT_BROKER") {
            match self.mqtt.as_mut() {
                Some(mqtt) => mqtt.broker = broker,
                None => {
                    self.mqtt = Some(MqttConfig {
                        broker,
                        client_id: default_client_id(),
                        username: None,
                        password: None,
                        use_tls: false,
                        ca_path: None,
                        client_cert_path: None,
                        client_key_path: None,
                        topics: MqttTopics::default(),
                        trigger_token: DEFAULT_TRIGGER_TOKEN.to_string(),
                    })
                }
            }
        }
        if let Some(mqtt) = self.mqtt.as_mut() {
            if let Some(user) = env_value("INSPECTOR_MQTT_USERNAME") {
                mqtt.username = Some(user);
            }
            if let Some(password) = env_value("INSPECTOR_MQTT_PASSWORD") {
                mqtt.password = Some(password);
            }
        }
        if let Some(endpoint) = env_value("INSPECTOR_HTTP_ENDPOINT") {
            match self.http.as_mut() {
                Some(http) => http.endpoint = endpoint,
                None => {
                    self.http = Some(HttpSettings {
                        endpoint,
                        timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
                    })
                }
            }
        }
        if let Some(addr) = env_value("INSPECTOR_STREAM_ADDR") {
            self.stream.addr = addr;
        }
        if let Some(names) = env_value("INSPECTOR_AREA_DEFECT_CLASSES") {
            let parsed = split_csv(&names);
            if !parsed.is_empty() {
                self.roles.area_defect = parsed;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.severity_thresholds()?;

        if self.mode.interval.is_zero() {
            return Err(anyhow!("inference interval must be greater than zero"));
        }
        if self.mode.settling_delay > MAX_SETTLING_DELAY {
            return Err(anyhow!(
                "settling delay {:?} exceeds the maximum of {:?}",
                self.mode.settling_delay,
                MAX_SETTLING_DELAY
            ));
        }

        for (name, value) in [
            ("confidence_threshold", self.detector.predict.confidence_threshold),
            ("iou_threshold", self.detector.predict.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector {} must lie within 0..=1, got {}", name, value));
            }
        }
        if self.detector.backend == "onnx"
            && (self.detector.model_path.is_none() || self.detector.class_names.is_none())
        {
            return Err(anyhow!(
                "the onnx detector backend needs detector.model_path and detector.class_names"
            ));
        }

        self.roles.reference = normalize_names(&self.roles.reference);
        self.roles.unconditional_defect = normalize_names(&self.roles.unconditional_defect);
        self.roles.area_defect = normalize_names(&self.roles.area_defect);
        if self.roles.reference.is_empty() {
            log::warn!("no reference class configured; area defects will not be graded");
        }
        check_role_overlap(&self.roles)?;

        if let Some(snapshots) = &self.snapshots {
            if let Some(base) = &snapshots.image_base_url {
                url::Url::parse(base)
                    .with_context(|| format!("invalid snapshots.image_base_url '{}'", base))?;
            }
        }
        Ok(())
    }

    pub fn severity_thresholds(&self) -> Result<SeverityThresholds> {
        SeverityThresholds::new(self.thresholds.minor_percent, self.thresholds.severe_percent)
    }
}

fn read_config_file(path: &Path) -> Result<InspectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg: InspectorConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// A class name may hold one role only.
fn check_role_overlap(roles: &RoleAssignment) -> Result<()> {
    let mut seen: HashMap<String, &'static str> = HashMap::new();
    for (role, names) in [
        ("reference", &roles.reference),
        ("unconditional_defect", &roles.unconditional_defect),
        ("area_defect", &roles.area_defect),
    ] {
        for name in names {
            if let Some(previous) = seen.insert(name.to_lowercase(), role) {
                if previous != role {
                    return Err(anyhow!(
                        "class '{}' is assigned to both {} and {}",
                        name,
                        previous,
                        role
                    ));
                }
            }
        }
    }
    Ok(())
}

fn normalize_names(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !out.iter().any(|existing| existing == name) {
            out.push(name.to_string());
        }
    }
    out
}

fn default_client_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("fruit-inspector-{:06x}", suffix)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn to_strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_toml(raw: &str) -> Result<InspectorConfig> {
        let file: InspectorConfigFile = toml::from_str(raw)?;
        let mut cfg = InspectorConfig::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn defaults_match_the_line_setup() {
        let cfg = parse_toml("").unwrap();
        assert_eq!(cfg.thresholds.minor_percent, 10.0);
        assert_eq!(cfg.thresholds.severe_percent, 15.0);
        assert_eq!(
            cfg.mode.inference_mode(),
            InferenceMode::Interval {
                period: Duration::from_secs(7)
            }
        );
        assert_eq!(cfg.roles.reference, vec!["Apple"]);
        assert_eq!(cfg.roles.unconditional_defect, vec!["Bruise", "rotten"]);
        assert_eq!(
            cfg.roles.area_defect,
            vec!["Black Dot", "dent", "scratch", "unriped"]
        );
        assert_eq!(cfg.stream.addr, "0.0.0.0:8080");
        assert_eq!(cfg.detector.backend, "stub");
        assert!(cfg.mqtt.is_none());
        assert!(cfg.http.is_none());
        assert!(cfg.snapshots.is_none());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = parse_toml("[thresholds]\nminor_percent = 20\nsevere_percent = 15\n")
            .unwrap_err();
        assert!(err.to_string().contains("below severe"));
    }

    #[test]
    fn rejects_zero_interval_and_long_settle() {
        assert!(parse_toml("[mode]\ninterval_secs = 0\n").is_err());
        assert!(parse_toml("[mode]\nkind = \"triggered\"\nsettling_delay_ms = 31000\n").is_err());
    }

    #[test]
    fn rejects_class_in_two_roles() {
        let err = parse_toml("[roles]\nreference = [\"Apple\"]\narea_defect = [\"apple\"]\n")
            .unwrap_err();
        assert!(err.to_string().contains("assigned to both"));
    }

    #[test]
    fn empty_reference_is_only_a_warning() {
        let cfg = parse_toml("[roles]\nreference = [\" \"]\n").unwrap();
        assert!(cfg.roles.reference.is_empty());
    }

    #[test]
    fn rejects_unknown_fields_and_bad_base_url() {
        assert!(toml::from_str::<InspectorConfigFile>("[bogus]\nx = 1\n").is_err());
        assert!(parse_toml("[snapshots]\nimage_base_url = \"not a url\"\n").is_err());
    }

    #[test]
    fn mqtt_section_requires_broker_and_fills_topics() {
        let cfg = parse_toml("[mqtt]\nbroker = \"mqtts://broker.local\"\nverdict_topic = \"line/verdict\"\n")
            .unwrap();
        let mqtt = cfg.mqtt.unwrap();
        assert_eq!(mqtt.topics.verdict, "line/verdict");
        assert_eq!(mqtt.topics.status, "defect_detection/status");
        assert!(mqtt.client_id.starts_with("fruit-inspector-"));
        let settings = mqtt.settings().unwrap();
        assert!(settings.endpoint.use_tls);
        assert_eq!(settings.endpoint.port, 8883);

        assert!(parse_toml("[mqtt]\nusername = \"x\"\n").unwrap().mqtt.is_none());
    }

    #[test]
    fn onnx_backend_needs_model_and_classes() {
        assert!(parse_toml("[detector]\nbackend = \"onnx\"\n").is_err());
        let cfg = parse_toml(
            "[detector]\nbackend = \"onnx\"\nmodel_path = \"m.onnx\"\nclass_names = [\"Apple\", \"dent\"]\n",
        )
        .unwrap();
        let table = cfg.detector.class_table().unwrap();
        assert_eq!(table.get(&1).map(String::as_str), Some("dent"));
    }

    #[test]
    fn mode_kind_parses_case_insensitively() {
        assert_eq!("Triggered".parse::<ModeKind>(), Ok(ModeKind::Triggered));
        assert_eq!(" interval ".parse::<ModeKind>(), Ok(ModeKind::Interval));
        assert!("sometimes".parse::<ModeKind>().is_err());
    }

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv(" a, ,b ,"), vec!["a", "b"]);
    }
}
