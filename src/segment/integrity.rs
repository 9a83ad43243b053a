use crate::error::{Result, SifterError};

fn squash(text: &str) -> Vec<char> {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Share of `original` (whitespace ignored) that `segments` fail to reproduce.
///
/// Measured as everything between the longest common prefix and the longest common
/// suffix of the two squashed strings, relative to the original's length.
pub fn drift_ratio(original: &str, segments: &[String]) -> f64 {
    let expected = squash(original);
    let actual: Vec<char> = segments.iter().flat_map(|s| squash(s)).collect();
    if expected == actual {
        return 0.0;
    }
    if expected.is_empty() {
        return 1.0;
    }

    let prefix = expected
        .iter()
        .zip(actual.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = expected.len().min(actual.len()) - prefix;
    let suffix = expected
        .iter()
        .rev()
        .zip(actual.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let differing = expected.len().max(actual.len()) - prefix - suffix;
    differing as f64 / expected.len() as f64
}

/// Check that `segments` concatenate back to `original`, ignoring whitespace.
///
/// Drift up to `tolerance` (a fraction) is accepted and logged; more is an
/// [`SifterError::Integrity`] error.
pub fn check_integrity(original: &str, segments: &[String], tolerance: f64) -> Result<()> {
    let drift = drift_ratio(original, segments);
    if drift == 0.0 {
        return Ok(());
    }
    if drift <= tolerance {
        log::warn!("Segmentation drift {:.4}% within tolerance", drift * 100.0);
        return Ok(());
    }
    Err(SifterError::Integrity(format!(
        "segments drift {:.3}% from the original (tolerance {:.3}%)",
        drift * 100.0,
        tolerance * 100.0
    )))
}
