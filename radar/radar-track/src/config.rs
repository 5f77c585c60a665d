use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

macro_rules! int_coded_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub enum $name {
            $($variant,)+
        }

        impl TryFrom<i64> for $name {
            type Error = String;
            fn try_from(code: i64) -> std::result::Result<Self, String> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err(format!(
                        concat!("invalid ", stringify!($name), " code {}"),
                        other
                    )),
                }
            }
        }

        impl From<$name> for i64 {
            fn from(v: $name) -> i64 {
                match v {
                    $($name::$variant => $code,)+
                }
            }
        }
    };
}

int_coded_enum! {
    /// Window applied before the range/doppler FFTs.
    WinType {
        Hanning = 1,
        Hamming = 2,
        Chebyshev = 3,
    }
}

int_coded_enum! {
    /// Angle-of-arrival estimation method.
    AoaEstimationType {
        Fft = 1,
        Music = 2,
        Dbf = 3,
        Capon = 4,
    }
}

int_coded_enum! {
    /// Constant-false-alarm-rate detector variant.
    CfarMethod {
        CaCfar = 1,
        SoCfar = 2,
        GoCfar = 3,
        OsCfar = 4,
    }
}

/// Front-end and frame-timing parameters of the radar sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RadarBasicConfig {
    pub num_rx: u32,
    pub num_tx: u32,
    pub start_frequency: f64,
    pub idle: f64,
    pub adc_start_time: f64,
    pub ramp_end_time: f64,
    pub freq_slope_const: f64,
    pub adc_sample_rate: f64,
    pub adc_samples: u32,
    pub num_chirps: u32,
    /// Radar frame rate; `1/fps` is the tracker's time step.
    pub fps: f64,
}

/// CFAR/AoA parameters of the detection stage that produces the point cloud
/// this crate consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RadarDetectionConfig {
    pub range_win_type: WinType,
    pub doppler_win_type: WinType,
    pub aoa_estimation_type: AoaEstimationType,
    pub doppler_cfar_method: CfarMethod,
    pub doppler_pfa: f64,
    pub doppler_win_guard_len: u32,
    pub doppler_win_train_len: u32,
    pub range_cfar_method: CfarMethod,
    pub range_pfa: f64,
    pub range_win_guard_len: u32,
    pub range_win_train_len: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RadarClusteringConfig {
    /// Radial neighborhood gate (meters).
    pub eps: f64,
    /// Velocity contribution to the clustering distance.
    pub weight: f64,
    pub min_points_in_cluster: usize,
    pub max_clusters: usize,
    /// Point budget per clustering call.
    pub max_points: usize,
}

/// Measurement-to-track association algorithm. Both use the same polar
/// distance and the same gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationPolicy {
    #[default]
    Greedy,
    Hungarian,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RadarTrackingConfig {
    pub tracker_association_threshold: f64,
    pub measurement_noise_variance: f64,
    /// Time period per frame (seconds); used when the caller does not supply
    /// an explicit dt.
    pub time_per_frame: f64,
    /// IIR forget factor for the low-pass filtered track extents.
    pub iir_forget_factor: f64,
    /// Hits needed for DETECTION -> ACTIVE.
    pub tracker_active_threshold: i32,
    /// Misses tolerated before a track expires.
    pub tracker_forget_threshold: i32,
    #[serde(default)]
    pub association: AssociationPolicy,
}

/// The complete radar runtime configuration document.
///
/// Wire format is a single JSON object with one section per processing
/// stage. Parsing fails with a diagnostic naming the missing key if a
/// required field is absent. Numbers are IEEE-754 doubles in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarConfig {
    #[serde(rename = "RadarBasicConfig")]
    pub basic: RadarBasicConfig,
    #[serde(rename = "RadarDetectionConfig")]
    pub detection: RadarDetectionConfig,
    #[serde(rename = "RadarClusteringConfig")]
    pub clustering: RadarClusteringConfig,
    #[serde(rename = "RadarTrackingConfig")]
    pub tracking: RadarTrackingConfig,
    /// Optional recorded point-cloud input for offline replay.
    #[serde(rename = "CSVFilePath", default)]
    pub csv_file_path: Option<String>,
    #[serde(rename = "csvRepeatNum", default)]
    pub csv_repeat_num: u32,
}

impl RadarConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: RadarConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.clustering.eps <= 0.0 {
            return Err(Error::InvalidParameter("eps must be positive".into()));
        }
        if self.clustering.max_points == 0 || self.clustering.max_clusters == 0 {
            return Err(Error::InvalidParameter(
                "maxPoints and maxClusters must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tracking.iir_forget_factor) {
            return Err(Error::InvalidParameter(
                "iirForgetFactor must be within [0, 1]".into(),
            ));
        }
        if self.basic.fps <= 0.0 {
            return Err(Error::InvalidParameter("fps must be positive".into()));
        }
        Ok(())
    }

    /// Tracker time step derived from the configured frame rate.
    pub fn frame_dt(&self) -> f64 {
        if self.tracking.time_per_frame > 0.0 {
            self.tracking.time_per_frame
        } else {
            1.0 / self.basic.fps
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "RadarBasicConfig": {
            "numRx": 4, "numTx": 2, "startFrequency": 77.0, "idle": 100.0,
            "adcStartTime": 6.0, "rampEndTime": 60.0, "freqSlopeConst": 29.98,
            "adcSampleRate": 10.0, "adcSamples": 256, "numChirps": 128,
            "fps": 10.0
        },
        "RadarDetectionConfig": {
            "rangeWinType": 1, "dopplerWinType": 2, "aoaEstimationType": 1,
            "dopplerCfarMethod": 1, "dopplerPfa": 0.001,
            "dopplerWinGuardLen": 2, "dopplerWinTrainLen": 8,
            "rangeCfarMethod": 2, "rangePfa": 0.001,
            "rangeWinGuardLen": 2, "rangeWinTrainLen": 8
        },
        "RadarClusteringConfig": {
            "eps": 0.5, "weight": 0.0, "minPointsInCluster": 2,
            "maxClusters": 24, "maxPoints": 512
        },
        "RadarTrackingConfig": {
            "trackerAssociationThreshold": 1.0,
            "measurementNoiseVariance": 1.0,
            "timePerFrame": 0.1, "iirForgetFactor": 0.25,
            "trackerActiveThreshold": 2, "trackerForgetThreshold": 3
        }
    }"#;

    #[test]
    fn parses_complete_document() {
        let cfg = RadarConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(cfg.basic.num_rx, 4);
        assert_eq!(cfg.detection.doppler_win_type, WinType::Hamming);
        assert_eq!(cfg.clustering.min_points_in_cluster, 2);
        assert_eq!(cfg.tracking.tracker_forget_threshold, 3);
        assert_eq!(cfg.tracking.association, AssociationPolicy::Greedy);
        assert!((cfg.frame_dt() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn missing_key_is_named() {
        let broken = SAMPLE.replace("\"eps\": 0.5,", "");
        let err = RadarConfig::from_json_str(&broken).unwrap_err();
        assert!(err.to_string().contains("eps"), "diagnostic: {err}");
    }

    #[test]
    fn bad_enum_code_rejected() {
        let broken = SAMPLE.replace("\"rangeWinType\": 1", "\"rangeWinType\": 9");
        assert!(RadarConfig::from_json_str(&broken).is_err());
    }

    #[test]
    fn invalid_parameter_rejected() {
        let broken = SAMPLE.replace("\"eps\": 0.5", "\"eps\": -1.0");
        let err = RadarConfig::from_json_str(&broken).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }
}
