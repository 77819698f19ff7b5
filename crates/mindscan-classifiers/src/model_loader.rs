//! Artifact resolution and Candle device/weight loading

use crate::config::EncoderSourceSpec;
use candle_core::{DType, Device, DeviceLocation};
use candle_nn::VarBuilder;
use hf_hub::{api::sync::Api, Repo, RepoType};
use mindscan_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Device type for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// CUDA, then Metal, then CPU
    Auto,
    /// CPU inference (always available)
    Cpu,
    /// CUDA GPU inference
    Cuda(usize), // GPU index
    /// Metal (Apple Silicon)
    Metal(usize),
}

/// Weight file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// SafeTensors format
    SafeTensors,
    /// PyTorch pickle (`torch.save` state dict)
    PyTorch,
}

impl ModelFormat {
    /// Infer the format from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("safetensors") => Self::SafeTensors,
            _ => Self::PyTorch,
        }
    }
}

/// Create Candle device from device type
pub fn create_device(device_type: DeviceType) -> Result<Device> {
    match device_type {
        DeviceType::Cpu => Ok(Device::Cpu),
        DeviceType::Cuda(idx) => Device::new_cuda(idx)
            .map_err(|e| Error::encoder(format!("Failed to create CUDA device: {}", e))),
        DeviceType::Metal(idx) => Device::new_metal(idx)
            .map_err(|e| Error::encoder(format!("Failed to create Metal device: {}", e))),
        DeviceType::Auto => {
            if candle_core::utils::cuda_is_available() {
                match Device::new_cuda(0) {
                    Ok(device) => return Ok(device),
                    Err(e) => warn!("CUDA reported available but failed to initialize: {}", e),
                }
            }
            if candle_core::utils::metal_is_available() {
                match Device::new_metal(0) {
                    Ok(device) => return Ok(device),
                    Err(e) => warn!("Metal reported available but failed to initialize: {}", e),
                }
            }
            Ok(Device::Cpu)
        }
    }
}

/// Short device name for status reports (`cpu`, `cuda:0`, `metal:0`)
pub fn device_label(device: &Device) -> String {
    match device.location() {
        DeviceLocation::Cpu => "cpu".to_string(),
        DeviceLocation::Cuda { gpu_id } => format!("cuda:{}", gpu_id),
        DeviceLocation::Metal { gpu_id } => format!("metal:{}", gpu_id),
    }
}

/// Load a weight file into a VarBuilder
pub fn load_var_builder(weights_path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    if !weights_path.exists() {
        return Err(Error::encoder(format!(
            "Encoder weights not found at {}",
            weights_path.display()
        )));
    }

    match ModelFormat::from_path(weights_path) {
        ModelFormat::SafeTensors => unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device).map_err(
                |e| Error::encoder(format!("Failed to load SafeTensors weights: {}", e)),
            )
        },
        ModelFormat::PyTorch => VarBuilder::from_pth(weights_path, DType::F32, device)
            .map_err(|e| Error::encoder(format!("Failed to load PyTorch weights: {}", e))),
    }
}

/// Files supplied by the encoder source
#[derive(Debug, Clone, Default)]
pub struct EncoderFiles {
    /// Transformer `config.json`, if the source has one
    pub config: Option<PathBuf>,

    /// `tokenizer.json` or `vocab.txt`, if the source has one
    pub tokenizer: Option<PathBuf>,
}

/// Locate the encoder's config and tokenizer, downloading them if needed
pub fn resolve_encoder_files(source: &EncoderSourceSpec) -> Result<EncoderFiles> {
    match source {
        EncoderSourceSpec::Local { path } => {
            if !path.is_dir() {
                return Err(Error::encoder(format!(
                    "Encoder directory does not exist: {}",
                    path.display()
                )));
            }

            Ok(EncoderFiles {
                config: Some(path.join("config.json")).filter(|p| p.exists()),
                tokenizer: find_tokenizer_file(path),
            })
        }
        EncoderSourceSpec::HuggingFace { repo, revision } => {
            download_from_huggingface(repo, revision)
        }
    }
}

/// Find `tokenizer.json` or `vocab.txt` in a directory
pub fn find_tokenizer_file(dir: &Path) -> Option<PathBuf> {
    ["tokenizer.json", "vocab.txt"]
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn download_from_huggingface(repo: &str, revision: &str) -> Result<EncoderFiles> {
    info!("Fetching encoder files from HuggingFace: {} @ {}", repo, revision);

    let api = Api::new()
        .map_err(|e| Error::encoder(format!("Failed to initialize HuggingFace API: {}", e)))?;

    let repo_obj = api.repo(Repo::with_revision(
        repo.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    let config = match repo_obj.get("config.json") {
        Ok(path) => Some(path),
        Err(e) => {
            debug!("config.json not available from {}: {}", repo, e);
            None
        }
    };

    let mut tokenizer = None;
    for file in ["tokenizer.json", "vocab.txt"] {
        match repo_obj.get(file) {
            Ok(path) => {
                debug!("Found tokenizer file: {}", file);
                tokenizer = Some(path);
                break;
            }
            Err(e) => debug!("File not found: {} ({})", file, e),
        }
    }

    if tokenizer.is_none() {
        warn!(
            "No tokenizer found in {} (tried tokenizer.json, vocab.txt)",
            repo
        );
    }

    Ok(EncoderFiles { config, tokenizer })
}
