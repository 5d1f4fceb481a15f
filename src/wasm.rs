//! WebAssembly bindings for the tiling sampler.
//!
//! Provides a thin wrapper around `TilingEngine` and `SampleCollector` for
//! browser environments. GPU readback is unavailable here, so every
//! request runs on the CPU.

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::{
    compute::{
        CftpPhase, CftpProgress, Configuration, CpuGrowth, Histogram, Pcg32, RegionStatus,
        SampleCollector, TilingEngine, growth_uniforms,
    },
    schema::{GrowthConfig, RegionSpec, SamplerConfig},
};

/// Initialize WASM module with panic hook and logging.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {e}")))
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Summary of one exact sample.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CftpSummary {
    horizon: u32,
    epochs: u32,
    statistic: u64,
    timed_out: bool,
}

/// Summary of a sample collection.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SamplesSummary<'a> {
    samples: &'a [u32],
    histogram: &'a Histogram,
    observe_at: u32,
}

/// WebAssembly wrapper for the tiling engine.
#[wasm_bindgen]
pub struct WasmSampler {
    engine: TilingEngine,
    current: Option<Configuration>,
    rng: Pcg32,
    collector: Option<SampleCollector>,
}

#[wasm_bindgen]
impl WasmSampler {
    #[wasm_bindgen(constructor)]
    pub fn new(seed: u64) -> WasmSampler {
        WasmSampler {
            engine: TilingEngine::default(),
            current: None,
            rng: Pcg32::keyed(seed, u32::MAX),
            collector: None,
        }
    }

    /// Install a region from a JSON region description. Returns
    /// `{status: "valid", sites}` or `{status: "invalid", reason}`.
    #[wasm_bindgen(js_name = initRegion)]
    pub fn init_region(&mut self, region_json: &str) -> Result<JsValue, JsValue> {
        let spec: RegionSpec = serde_json::from_str(region_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid region JSON: {e}")))?;
        self.install(&spec)
    }

    /// Install a domino region from flat `(x, y, kind)` triples.
    #[wasm_bindgen(js_name = initDominoRegion)]
    pub fn init_domino_region(&mut self, triples: &[i32]) -> Result<JsValue, JsValue> {
        if triples.len() % 3 != 0 {
            return Err(JsValue::from_str("Triples array length must be a multiple of 3"));
        }
        let triples: Vec<[i32; 3]> = triples
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();
        self.install(&RegionSpec::from_triples(&triples))
    }

    fn install(&mut self, spec: &RegionSpec) -> Result<JsValue, JsValue> {
        self.current = None;
        let status: RegionStatus = self.engine.init_region(spec);
        to_js(&status)
    }

    #[wasm_bindgen(js_name = setBiasParameter)]
    pub fn set_bias_parameter(&mut self, q: f32) -> Result<(), JsValue> {
        self.engine.set_bias_parameter(q).map_err(js_error)
    }

    /// Draw one exact sample and keep it as the current configuration.
    /// A timeout keeps the previous configuration.
    #[wasm_bindgen(js_name = runCFTP)]
    pub fn run_cftp(&mut self, seed: u64) -> Result<JsValue, JsValue> {
        let mut last: Option<CftpProgress> = None;
        match self.engine.run_cftp_observed(seed, |p| last = Some(p)) {
            Ok(sample) => {
                let statistic = self.engine.statistic(&sample.config).map_err(js_error)?;
                self.current = Some(sample.config);
                to_js(&CftpSummary {
                    horizon: sample.horizon,
                    epochs: sample.epochs,
                    statistic,
                    timed_out: false,
                })
            }
            Err(e) => match last {
                Some(p) if p.phase == CftpPhase::TimedOut => to_js(&CftpSummary {
                    horizon: p.horizon,
                    epochs: p.epoch,
                    statistic: 0,
                    timed_out: true,
                }),
                _ => Err(js_error(e)),
            },
        }
    }

    /// Run `count` local steps at bias `q` on the current configuration.
    #[wasm_bindgen(js_name = performLocalSteps)]
    pub fn perform_local_steps(&mut self, count: u32, q: f32) -> Result<u32, JsValue> {
        let config = self
            .current
            .as_mut()
            .ok_or_else(|| JsValue::from_str("No configuration; call runCFTP first"))?;
        let changed = self
            .engine
            .perform_local_steps(config, count as u64, q, &mut self.rng)
            .map_err(js_error)?;
        Ok(changed as u32)
    }

    /// Current configuration as flat `(x, y, state)` triples.
    #[wasm_bindgen(js_name = exportConfiguration)]
    pub fn export_configuration(&self) -> Result<js_sys::Int32Array, JsValue> {
        let config = self
            .current
            .as_ref()
            .ok_or_else(|| JsValue::from_str("No configuration; call runCFTP first"))?;
        let records = self.engine.export_configuration(config).map_err(js_error)?;
        let flat: Vec<i32> = records
            .iter()
            .flat_map(|r| [r.x, r.y, r.state as i32])
            .collect();
        Ok(js_sys::Int32Array::from(flat.as_slice()))
    }

    /// Collect midpoint-height samples for the lattice path described by
    /// `config_json`. The collector persists across calls, so exact start
    /// states are drawn once per region, bias and seed.
    #[wasm_bindgen(js_name = collectSamples)]
    pub fn collect_samples(&mut self, config_json: &str, count: usize) -> Result<JsValue, JsValue> {
        let config: SamplerConfig = serde_json::from_str(config_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid config JSON: {e}")))?;
        let collector = match self.collector.take() {
            Some(mut collector) => {
                let reconfigured = collector.reconfigure(config);
                let collector = self.collector.insert(collector);
                reconfigured.map_err(js_error)?;
                collector
            }
            None => self
                .collector
                .insert(SampleCollector::new(config).map_err(js_error)?),
        };
        let set = collector.collect(count).map_err(js_error)?;
        to_js(&SamplesSummary {
            samples: &set.samples,
            histogram: &set.histogram,
            observe_at: set.observe_at,
        })
    }

    /// Sample an RSK growth diagram and return its output partition.
    #[wasm_bindgen(js_name = sampleGrowth)]
    pub fn sample_growth(growth_json: &str, seed: u64) -> Result<Vec<u32>, JsValue> {
        let growth: GrowthConfig = serde_json::from_str(growth_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid growth JSON: {e}")))?;
        growth.validate().map_err(js_error)?;
        let uniforms = growth_uniforms(growth.size, &growth.law, seed);
        Ok(CpuGrowth::new()
            .run(growth.size, &growth.law, &uniforms)
            .partition())
    }
}
