use clap::Parser;
use map_facade_lib::{ExportFormat, FacadeConfig, TrackingConfig};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Track Recorder - replay GPS samples through the tracking pipeline and export the track
pub struct Settings {
    /// Samples to replay: a GPX file, a JSON array or JSON lines of `{lat, lon, accuracy}`
    #[clap(value_name = "FILE")]
    pub samples: PathBuf,

    /// Export formats (gpx, kml, geojson)
    #[clap(short, long, value_delimiter = ',', default_value = "gpx")]
    pub format: Vec<ExportFormat>,

    /// Directory the exported files are written to
    #[clap(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Facade configuration file (JSON, missing fields use defaults)
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Drop samples with a worse horizontal accuracy (meters)
    #[clap(long)]
    pub max_accuracy: Option<f64>,

    /// Drop samples closer than this to the last accepted point (meters)
    #[clap(long)]
    pub min_step: Option<f64>,

    /// Delay between two replayed samples in milliseconds
    #[clap(long, default_value = "0")]
    pub interval_ms: u64,

    /// Offline draft queue file
    #[clap(long, value_name = "FILE")]
    pub drafts: Option<PathBuf>,

    /// Push queued drafts to the outbox after recording
    #[clap(long, default_value = "false")]
    pub sync: bool,

    /// Run without the premium entitlement (tracking and export are refused)
    #[clap(long, default_value = "false")]
    pub free_tier: bool,
}

impl Settings {
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Facade configuration from the config file with command line overrides applied
    pub fn facade_config(&self) -> crate::Result<FacadeConfig> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => FacadeConfig::default(),
        };
        self.apply_overrides(&mut config.tracking);
        Ok(config)
    }

    fn apply_overrides(&self, tracking: &mut TrackingConfig) {
        if let Some(max_accuracy) = self.max_accuracy {
            tracking.max_accuracy_m = max_accuracy;
        }
        if let Some(min_step) = self.min_step {
            tracking.min_step_m = min_step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats_and_overrides() {
        let settings = Settings::parse_from([
            "track-recorder",
            "walk.gpx",
            "--format",
            "gpx,geojson",
            "--max-accuracy",
            "20",
        ]);
        assert_eq!(settings.format, vec![ExportFormat::Gpx, ExportFormat::GeoJson]);
        let config = settings.facade_config().unwrap();
        assert_eq!(config.tracking.max_accuracy_m, 20.0);
        assert_eq!(config.tracking.min_step_m, TrackingConfig::default().min_step_m);
        assert!(!settings.free_tier);
    }

    #[test]
    fn test_config_file_with_cli_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facade.json");
        std::fs::write(&path, r#"{"tracking": {"min_step_m": 2.0, "max_accuracy_m": 30.0}}"#)
            .unwrap();
        let args: Vec<std::ffi::OsString> = vec![
            "track-recorder".into(),
            "walk.json".into(),
            "--config".into(),
            path.into_os_string(),
            "--min-step".into(),
            "8".into(),
        ];
        let settings = Settings::parse_from(args);
        let config = settings.facade_config().unwrap();
        assert_eq!(config.tracking.max_accuracy_m, 30.0);
        assert_eq!(config.tracking.min_step_m, 8.0);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(Settings::try_parse_from(["track-recorder", "a.gpx", "-f", "shp"]).is_err());
    }
}
