use serde::{Serialize, Serializer};

use crate::harness::TimingResult;
use crate::provenance::EngineInfo;
use crate::shape::ProblemShape;

/// Flat result record emitted on stdout, only on full success.
#[derive(Debug, Clone, Serialize)]
pub struct BenchRecord {
    pub engine: EngineInfo,
    #[serde(rename = "M")]
    pub m: usize,
    #[serde(rename = "N")]
    pub n: usize,
    #[serde(rename = "K")]
    pub k: usize,
    pub repeats: usize,
    pub bytes_total: u64,
    #[serde(serialize_with = "one_decimal")]
    pub megabytes_total: f64,
    #[serde(serialize_with = "six_decimals")]
    pub time_sec: f64,
    #[serde(serialize_with = "two_decimals")]
    pub gflops: f64,
    #[serde(serialize_with = "six_decimals")]
    pub checksum: f64,
}

impl BenchRecord {
    pub fn new(
        engine: EngineInfo,
        shape: ProblemShape,
        timing: TimingResult,
        checksum: f32,
    ) -> Self {
        let bytes_total = shape.total_bytes();
        Self {
            engine,
            m: shape.m,
            n: shape.n,
            k: shape.k,
            repeats: timing.repeats,
            bytes_total,
            megabytes_total: bytes_total as f64 / (1024.0 * 1024.0),
            time_sec: timing.elapsed_sec,
            gflops: timing.gflops(shape),
            checksum: checksum as f64,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn rounded<S: Serializer>(value: f64, decimals: i32, serializer: S) -> Result<S::Ok, S::Error> {
    let scale = 10f64.powi(decimals);
    let v = (value * scale).round() / scale;
    serializer.serialize_f64(v)
}

fn one_decimal<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    rounded(*value, 1, serializer)
}

fn two_decimals<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    rounded(*value, 2, serializer)
}

fn six_decimals<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    rounded(*value, 6, serializer)
}
