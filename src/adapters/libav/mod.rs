//! FFmpeg-backed demuxer and muxer.
//!
//! Both sides exchange bytes with libavformat through temporary files.
//! Decoded pictures travel inside [`VideoFrame`](crate::domain::model::VideoFrame)
//! resources and are released when the frame is closed.

mod convert;
mod demux;
mod mux;

pub use demux::LibavDemuxer;
pub use mux::LibavMuxer;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ffmpeg_next as ffmpeg;
    use ffmpeg::format::sample::Type as SampleLayout;
    use ffmpeg::format::{Pixel, Sample};
    use ffmpeg::{codec, frame};

    use super::convert::{self, SendCell};
    use super::demux::LibavPicture;
    use super::{LibavDemuxer, LibavMuxer};
    use crate::config::PipelineConfig;
    use crate::domain::errors::DomainError;
    use crate::domain::model::*;
    use crate::domain::rules::ProfileBuilder;
    use crate::ports::*;

    #[test]
    fn packed_encoder_frames_deinterleave_to_planes() {
        ffmpeg::init().unwrap();
        let buffer = AudioSampleBuffer::new(
            48_000,
            vec![vec![0.25, 0.5, 0.75, 1.0], vec![-0.25, -0.5, -0.75, -1.0]],
        )
        .unwrap();

        let frame = convert::to_encoder_frame(&buffer, 1, 2, Sample::F32(SampleLayout::Packed)).unwrap();
        let decoded = convert::to_sample_buffer(&frame).unwrap();

        assert_eq!(decoded.sample_rate(), 48_000);
        assert_eq!(decoded.plane(0), Some(&[0.5, 0.75][..]));
        assert_eq!(decoded.plane(1), Some(&[-0.5, -0.75][..]));
    }

    #[test]
    fn unsupported_encoder_format_is_rejected() {
        let buffer = AudioSampleBuffer::silent(44_100, 1, 8).unwrap();
        let result = convert::to_encoder_frame(&buffer, 0, 8, Sample::I16(SampleLayout::Packed));
        assert!(result.is_err());
    }

    #[test]
    fn display_matrix_holds_clockwise_rotation() {
        for degrees in [90.0, 180.0, 270.0] {
            let mut parameters = codec::Parameters::new();
            assert_eq!(convert::display_rotation(&parameters), None);

            convert::set_display_rotation(&mut parameters, degrees).unwrap();
            assert_eq!(convert::display_rotation(&parameters), Some(degrees));
        }
    }

    #[test]
    fn encoder_drain_stops_only_on_again_or_eof() {
        let again = ffmpeg::Error::Other {
            errno: ffmpeg::ffi::EAGAIN as i32,
        };
        assert!(convert::is_drained(&again));
        assert!(convert::is_drained(&ffmpeg::Error::Eof));
        assert!(!convert::is_drained(&ffmpeg::Error::InvalidData));
        assert!(!convert::is_drained(&ffmpeg::Error::Other { errno: 12 }));
    }

    #[tokio::test]
    async fn rotation_survives_encode_and_reopen() {
        let muxer = LibavMuxer::new().unwrap();
        let config = PipelineConfig {
            prefer_hardware_acceleration: false,
            ..PipelineConfig::default()
        };
        let profile = ProfileBuilder::new(&config).build(64, 64, 500_000.0);

        let mut output = muxer.create_output().await.unwrap();
        let options = VideoTrackOptions {
            rotation: Rotation::Cw90,
            frame_rate: profile.frame_rate,
        };
        let mut video = match output.add_video_track(&profile, options) {
            Ok(video) => video,
            Err(DomainError::UnsupportedCodec(reason)) => {
                eprintln!("no H.264 encoder in this FFmpeg build: {}", reason);
                return;
            }
            Err(e) => panic!("{}", e),
        };
        output.start().await.unwrap();

        for index in 0..3 {
            let picture = frame::Video::new(Pixel::YUV420P, 64, 64);
            let timestamp = index as f64 / f64::from(profile.frame_rate);
            let frame = VideoFrame::new(timestamp, 1.0 / f64::from(profile.frame_rate))
                .with_resource(LibavPicture(SendCell(picture)));
            video.add_frame(&frame).await.unwrap();
            frame.close();
        }
        video.close().await.unwrap();
        let bytes = output.finalize().await.unwrap();

        let demuxer = LibavDemuxer::new().unwrap();
        let mut source = demuxer.open(Arc::from(bytes)).await.unwrap();
        let tracks = source.video_tracks().await.unwrap();
        source.dispose();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].rotation, 90.0);
    }
}
