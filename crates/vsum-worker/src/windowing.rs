//! Sliding-window grouping of frames into caption units.

use vsum_models::SamplingParams;

use crate::error::WindowingError;

/// Split frame ids (sorted ascending) into overlapping caption windows.
///
/// Windows advance by `window_size - overlap`. The first window holds
/// `min(window_size, step)` frames; later windows keep that width until
/// they are clipped at the last frame. Windows cover every frame when
/// `step >= window_size - overlap`.
pub fn frame_windows(
    frame_ids: &[u64],
    window_size: u32,
    overlap: u32,
    step: u32,
) -> Result<Vec<Vec<u64>>, WindowingError> {
    if window_size == 0 {
        return Err(WindowingError::ZeroWindowSize);
    }
    if step == 0 {
        return Err(WindowingError::ZeroStep);
    }
    if window_size <= overlap {
        return Err(WindowingError::NonPositiveStride { window_size, overlap });
    }

    let count = frame_ids.len();
    let stride = (window_size - overlap) as usize;
    let mut left = 0usize;
    let mut right = (window_size.min(step) as usize).min(count);
    let mut windows = Vec::new();

    while left < count {
        windows.push(frame_ids[left..right].to_vec());
        left += stride;
        right = (right + stride).min(count);
    }

    Ok(windows)
}

/// Windows for a state's frames under its sampling parameters.
pub fn windows_for(frame_ids: &[u64], sampling: &SamplingParams) -> Result<Vec<Vec<u64>>, WindowingError> {
    frame_windows(
        frame_ids,
        sampling.multi_frame,
        sampling.frame_overlap,
        sampling.sampling_frame,
    )
}
