//! Output device lookup and stream-config selection.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Output device whose name contains `needle` (case-insensitive), or the host
/// default when no needle is given.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle.map(str::trim).filter(|n| !n.is_empty()) else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device"));
    };
    host.output_devices()
        .context("enumerate output devices")?
        .find(|d| {
            d.description()
                .map(|desc| name_matches(&desc.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("no output device matched {needle:?}"))
}

/// Names of every output device on `host`.
pub fn list_device_names(host: &cpal::Host) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for d in host.output_devices().context("enumerate output devices")? {
        names.push(d.description()?.to_string());
    }
    Ok(names)
}

/// Pick an output config as close as possible to `source_rate` so most
/// streams skip resampling. Ties prefer float sample formats.
pub fn pick_output_config(
    device: &cpal::Device,
    source_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<((u32, u8), cpal::SupportedStreamConfig)> = None;
    for range in device.supported_output_configs()? {
        let rate = source_rate.clamp(range.min_sample_rate(), range.max_sample_rate());
        let key = (rate.abs_diff(source_rate), format_rank(range.sample_format()));
        if best.as_ref().is_none_or(|(best_key, _)| key < *best_key) {
            best = Some((key, range.with_sample_rate(rate)));
        }
    }
    match best {
        Some((_, cfg)) => Ok(cfg),
        None => device
            .default_output_config()
            .context("no supported output configs"),
    }
}

fn format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn name_matches(name: &str, needle: &str) -> bool {
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_match_ignores_case() {
        assert!(name_matches("USB DAC", "dac"));
        assert!(name_matches("usb dac", "USB"));
        assert!(!name_matches("USB DAC", "speaker"));
    }

    #[test]
    fn float_formats_rank_first() {
        assert!(format_rank(cpal::SampleFormat::F32) < format_rank(cpal::SampleFormat::I16));
        assert!(format_rank(cpal::SampleFormat::I16) < format_rank(cpal::SampleFormat::U8));
    }
}
