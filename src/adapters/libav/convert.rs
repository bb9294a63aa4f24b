// Sample and timestamp conversion between FFmpeg frames and domain buffers

use ffmpeg_next as ffmpeg;

use ffmpeg::format::sample::Type as SampleLayout;
use ffmpeg::format::Sample;
use ffmpeg::ffi;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::{codec, frame, Rational};

use crate::domain::errors::DomainError;
use crate::domain::model::AudioSampleBuffer;

/// Wraps an FFmpeg context so it can move between threads with its owner.
///
/// SAFETY: every wrapped value is owned by a single adapter object and is
/// only touched through `&mut` access of that owner, or through a shared
/// borrow held by that owner's current task. No two threads read it at once.
pub(crate) struct SendCell<T>(pub T);

unsafe impl<T> Send for SendCell<T> {}
unsafe impl<T> Sync for SendCell<T> {}

/// 3x3 matrix of 32-bit fixed point values
const DISPLAY_MATRIX_BYTES: usize = 9 * std::mem::size_of::<i32>();

pub(crate) fn is_again(error: &ffmpeg::Error) -> bool {
    matches!(error, ffmpeg::Error::Other { errno } if *errno == ffi::EAGAIN as i32)
}

/// Whether a `receive_*` error only means there is nothing more to take right now
pub(crate) fn is_drained(error: &ffmpeg::Error) -> bool {
    matches!(error, ffmpeg::Error::Eof) || is_again(error)
}

/// Clockwise rotation in degrees from the display matrix side data
pub(crate) fn display_rotation(parameters: &codec::Parameters) -> Option<f64> {
    // SAFETY: the side data array belongs to `parameters`, which outlives this call.
    unsafe {
        let par = parameters.as_ptr();
        let side = ffi::av_packet_side_data_get(
            (*par).coded_side_data,
            (*par).nb_coded_side_data,
            ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side.is_null() || (*side).size < DISPLAY_MATRIX_BYTES {
            return None;
        }
        // The matrix stores a counterclockwise angle.
        let counterclockwise = ffi::av_display_rotation_get((*side).data as *const i32);
        counterclockwise
            .is_finite()
            .then(|| (-counterclockwise).round().rem_euclid(360.0))
    }
}

/// Store a clockwise rotation as display matrix side data
pub(crate) fn set_display_rotation(parameters: &mut codec::Parameters, degrees: f64) -> Result<(), DomainError> {
    // SAFETY: the new entry is owned by `parameters` and sized for a full matrix.
    unsafe {
        let par = parameters.as_mut_ptr();
        let side = ffi::av_packet_side_data_new(
            &mut (*par).coded_side_data,
            &mut (*par).nb_coded_side_data,
            ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
            DISPLAY_MATRIX_BYTES,
            0,
        );
        if side.is_null() {
            return Err(DomainError::MuxFailed("Cannot allocate display matrix".to_string()));
        }
        ffi::av_display_rotation_set((*side).data as *mut i32, -degrees);
    }
    Ok(())
}

pub(crate) fn seconds(ts: i64, time_base: Rational) -> f64 {
    ts as f64 * f64::from(time_base)
}

pub(crate) fn channel_layout(channels: usize) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::MONO,
        2 => ChannelLayout::STEREO,
        n => ChannelLayout::default_for_channels(n as u32),
    }
}

fn read_samples<const N: usize>(
    frame: &frame::Audio,
    channels: usize,
    samples: usize,
    planar: bool,
    convert: fn([u8; N]) -> f32,
) -> Result<Vec<Vec<f32>>, DomainError> {
    let short = || DomainError::DecodeFailed("audio frame shorter than its sample count".to_string());
    let mut planes = vec![Vec::with_capacity(samples); channels];

    if planar {
        for (channel, plane) in planes.iter_mut().enumerate() {
            let data = frame.data(channel).get(..samples * N).ok_or_else(short)?;
            plane.extend(data.chunks_exact(N).map(|b| convert(to_array(b))));
        }
    } else {
        let data = frame
            .data(0)
            .get(..samples * channels * N)
            .ok_or_else(short)?;
        for (i, bytes) in data.chunks_exact(N).enumerate() {
            planes[i % channels].push(convert(to_array(bytes)));
        }
    }
    Ok(planes)
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Convert any decoded PCM layout to planar f32
pub(crate) fn to_sample_buffer(frame: &frame::Audio) -> Result<AudioSampleBuffer, DomainError> {
    let channels = frame.ch_layout().channels() as usize;
    let samples = frame.samples();
    if channels == 0 {
        return Err(DomainError::DecodeFailed("audio frame has no channels".to_string()));
    }

    let planes = match frame.format() {
        Sample::F32(layout) => read_samples::<4>(
            frame,
            channels,
            samples,
            layout == SampleLayout::Planar,
            f32::from_ne_bytes,
        )?,
        Sample::F64(layout) => read_samples::<8>(
            frame,
            channels,
            samples,
            layout == SampleLayout::Planar,
            |b| f64::from_ne_bytes(b) as f32,
        )?,
        Sample::I16(layout) => read_samples::<2>(
            frame,
            channels,
            samples,
            layout == SampleLayout::Planar,
            |b| i16::from_ne_bytes(b) as f32 / 32_768.0,
        )?,
        Sample::I32(layout) => read_samples::<4>(
            frame,
            channels,
            samples,
            layout == SampleLayout::Planar,
            |b| i32::from_ne_bytes(b) as f32 / 2_147_483_648.0,
        )?,
        Sample::U8(layout) => read_samples::<1>(
            frame,
            channels,
            samples,
            layout == SampleLayout::Planar,
            |b| (b[0] as f32 - 128.0) / 128.0,
        )?,
        other => {
            return Err(DomainError::UnsupportedCodec(format!(
                "Unsupported decoded sample format: {:?}",
                other
            )))
        }
    };

    AudioSampleBuffer::new(frame.rate(), planes)
}

/// Build an encoder input frame from `len` samples of `buffer` starting at `offset`
pub(crate) fn to_encoder_frame(
    buffer: &AudioSampleBuffer,
    offset: usize,
    len: usize,
    format: Sample,
) -> Result<frame::Audio, DomainError> {
    let channels = buffer.channel_count();
    let mut out = frame::Audio::new(format, len, channel_layout(channels));
    out.set_rate(buffer.sample_rate());

    match format {
        Sample::F32(SampleLayout::Planar) => {
            for (channel, plane) in buffer.planes().iter().enumerate() {
                let src = &plane[offset..offset + len];
                let dst = &mut out.data_mut(channel)[..len * 4];
                for (bytes, sample) in dst.chunks_exact_mut(4).zip(src) {
                    bytes.copy_from_slice(&sample.to_ne_bytes());
                }
            }
        }
        Sample::F32(SampleLayout::Packed) => {
            let dst = &mut out.data_mut(0)[..len * channels * 4];
            for (i, bytes) in dst.chunks_exact_mut(4).enumerate() {
                let sample = buffer.planes()[i % channels][offset + i / channels];
                bytes.copy_from_slice(&sample.to_ne_bytes());
            }
        }
        other => {
            return Err(DomainError::UnsupportedCodec(format!(
                "Unsupported encoder sample format: {:?}",
                other
            )))
        }
    }
    Ok(out)
}
