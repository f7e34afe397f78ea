//! Load-side integration tests against the reference codec.

mod common;

use common::{Faults, RawCodec, build_jp2, layout, pattern, values};
use j2kbridge_rs::codec::Resilience;
use j2kbridge_rs::constants::{J2K_CODESTREAM_MAGIC, JP2_RFC3745_MAGIC, META_ICC_NAME};
use j2kbridge_rs::descriptor::MetadataValue;
use j2kbridge_rs::jpeg2000::jp2::{
    ChannelDefinition, ChannelKind, ColourSpecification, EnumCs, ResolutionBox,
};
use j2kbridge_rs::jpeg2000::parser::ComponentInfo;
use j2kbridge_rs::{
    BandFormat, BridgeError, ErrorCategory, FailOn, Interpretation, Jp2Loader, LoadOptions,
    PixelBuffer, Rect, Source,
};
use std::io::Cursor;

fn rgb_file(width: u32, height: u32) -> (Vec<u8>, Vec<u32>) {
    let samples = pattern(width, height, 3, 8);
    let file = build_jp2(
        &layout(width, height, 3, 8),
        vec![ComponentInfo::unsigned(8); 3],
        5,
        (32, 32),
        &samples,
    );
    (file, samples)
}

fn grey16_file(width: u32, height: u32) -> (Vec<u8>, Vec<u32>) {
    let samples = pattern(width, height, 1, 16);
    let file = build_jp2(
        &layout(width, height, 1, 16),
        vec![ComponentInfo::unsigned(16)],
        5,
        (128, 128),
        &samples,
    );
    (file, samples)
}

/// Full-resolution RGB decodes to the stored samples.
#[test]
fn test_load_rgb_image() {
    let (file, samples) = rgb_file(64, 48);
    let codec = RawCodec::new();
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap();

    let desc = loader.descriptor();
    assert_eq!((desc.width, desc.height, desc.bands), (64, 48, 3));
    assert_eq!(desc.format, BandFormat::UChar);
    assert_eq!(desc.bits_per_sample, 8);
    assert_eq!(desc.interpretation, Interpretation::Srgb);
    assert_eq!(desc.n_pages, 1);
    assert_eq!((desc.xres, desc.yres), (1.0, 1.0));

    let image = loader.read_image().unwrap();
    assert_eq!(values(&image), samples);

    let stats = codec.stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.affinity_violations, 0);
}

/// Pages are the codestream decoded with resolution levels discarded.
#[test]
fn test_load_reduced_page() {
    let (file, samples) = grey16_file(512, 256);
    let codec = RawCodec::new();
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default().page(1)).unwrap();

    let desc = loader.descriptor();
    assert_eq!(desc.n_pages, 2);
    assert_eq!((desc.width, desc.height), (256, 128));
    assert_eq!(desc.format, BandFormat::UShort);
    assert_eq!(desc.interpretation, Interpretation::BW);
    assert_eq!(codec.stats().restrictions.unwrap().discard_levels, 1);

    let region = Rect::new(10, 20, 7, 5);
    let pixels = loader.read_region(region).unwrap();
    for row in 0..5u32 {
        for col in 0..7u32 {
            let x = (region.left + col) * 2;
            let y = (region.top + row) * 2;
            let expected = samples[(y * 512 + x) as usize];
            assert_eq!(pixels.get((row * 7 + col) as usize), Some(expected));
        }
    }
}

#[test]
fn test_page_out_of_range() {
    let (file, _) = grey16_file(512, 256);
    let codec = RawCodec::new();
    let err = Jp2Loader::from_buffer(&codec, file, LoadOptions::default().page(2)).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidPage { page: 2, n_pages: 2 }));
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(codec.stats().opened, 0, "codestream must not be opened for a bad page");
}

#[test]
fn test_raw_codestream_and_foreign_input() {
    let codec = RawCodec::new();
    let mut raw = J2K_CODESTREAM_MAGIC.to_vec();
    raw.resize(64, 0);
    let err = Jp2Loader::from_buffer(&codec, raw, LoadOptions::default()).unwrap_err();
    assert!(matches!(err, BridgeError::UnsupportedRawCodestream));
    assert_eq!(err.category(), ErrorCategory::ContainerOpen);

    let err = Jp2Loader::from_buffer(&codec, vec![0x89u8; 64], LoadOptions::default()).unwrap_err();
    assert!(err.is_decline());
}

#[test]
fn test_truncated_container_fails_to_open() {
    let (file, _) = rgb_file(16, 16);
    let codec = RawCodec::new();
    let err = Jp2Loader::from_buffer(&codec, file[..60].to_vec(), LoadOptions::default())
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ContainerOpen);
}

/// A box whose 64-bit length runs past the end of the address space is a
/// container error, not a crash.
#[test]
fn test_oversized_box_fails_to_open() {
    let mut file = JP2_RFC3745_MAGIC.to_vec();
    file.extend_from_slice(&1u32.to_be_bytes());
    file.extend_from_slice(b"free");
    file.extend_from_slice(&u64::MAX.to_be_bytes());
    file.extend_from_slice(&[0; 32]);
    let codec = RawCodec::new();
    let err = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ContainerOpen);
    assert_eq!(codec.stats().opened, 0);
}

/// Every tile request attaches its own pool and keeps to one thread.
#[test]
fn test_fresh_pool_per_request() {
    let (file, _) = rgb_file(64, 64);
    let codec = RawCodec::new();
    let loader =
        Jp2Loader::from_buffer(&codec, file, LoadOptions::default().concurrency(2)).unwrap();
    loader.read_region(Rect::new(0, 0, 32, 32)).unwrap();
    loader.read_region(Rect::new(0, 0, 32, 32)).unwrap();
    loader.read_region(Rect::new(32, 32, 32, 32)).unwrap();

    let stats = codec.stats();
    assert_eq!(stats.region_starts, 3);
    let mut pools = stats.region_pools.clone();
    pools.dedup();
    assert_eq!(pools.len(), 3);
    assert_eq!(stats.affinity_violations, 0);
}

/// Concurrent requests from different threads give the same pixels as
/// sequential ones.
#[test]
fn test_concurrent_requests_are_deterministic() {
    let (file, _) = rgb_file(96, 64);
    let codec = RawCodec::new();
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap();
    let tiles: Vec<Rect> = (0..3)
        .flat_map(|tx| (0..2).map(move |ty| Rect::new(tx * 32, ty * 32, 32, 32)))
        .collect();
    let sequential: Vec<PixelBuffer> =
        tiles.iter().map(|&t| loader.read_region(t).unwrap()).collect();

    let concurrent: Vec<PixelBuffer> = std::thread::scope(|scope| {
        let handles: Vec<_> = tiles
            .iter()
            .map(|&t| {
                let loader = &loader;
                scope.spawn(move || loader.read_region(t).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(sequential, concurrent);
    assert_eq!(codec.stats().affinity_violations, 0);
}

/// A codec error mid-decode fails the request and then the session.
#[test]
fn test_codec_error_poisons_session() {
    let (file, _) = rgb_file(32, 32);
    let codec = RawCodec::with_faults(Faults {
        error_on_process: Some(2),
        ..Faults::default()
    });
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap();
    let err = loader.read_region(Rect::new(0, 0, 32, 32)).unwrap_err();
    match &err {
        BridgeError::Codec { message } => assert!(message.contains("injected decode fault")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(loader.is_failed());
    assert!(matches!(
        loader.read_region(Rect::new(0, 0, 4, 4)),
        Err(BridgeError::SessionFailed)
    ));
    assert_eq!(codec.stats().process_calls, 2);
}

/// Running out of worker threads ends the load, not just the request.
#[test]
fn test_thread_attach_failure_poisons_session() {
    let (file, _) = rgb_file(32, 32);
    let codec = RawCodec::with_faults(Faults {
        attach_failure_on_start: true,
        ..Faults::default()
    });
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap();
    let err = loader.read_region(Rect::new(0, 0, 8, 8)).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ResourceExhausted);
    assert!(loader.is_failed());
    assert!(matches!(
        loader.read_region(Rect::new(8, 8, 8, 8)),
        Err(BridgeError::SessionFailed)
    ));
    assert_eq!(codec.stats().region_starts, 0);
}

#[test]
fn test_codec_panic_is_contained() {
    let (file, _) = rgb_file(32, 32);
    let codec = RawCodec::with_faults(Faults {
        panic_on_start: true,
        ..Faults::default()
    });
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap();
    let err = loader.read_region(Rect::new(0, 0, 8, 8)).unwrap_err();
    assert!(matches!(err, BridgeError::CodecPanic { operation: "region start", .. }));
    assert!(loader.is_failed());
}

#[test]
fn test_finish_refusal_is_decode_error() {
    let (file, _) = rgb_file(32, 32);
    let codec = RawCodec::with_faults(Faults {
        refuse_finish: true,
        ..Faults::default()
    });
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap();
    assert!(matches!(
        loader.read_region(Rect::new(0, 0, 8, 8)),
        Err(BridgeError::DecodeFailed { .. })
    ));
}

/// Bad rectangles are caller errors and leave the session usable.
#[test]
fn test_region_outside_page() {
    let (file, _) = rgb_file(32, 32);
    let codec = RawCodec::new();
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap();
    assert!(matches!(
        loader.read_region(Rect::new(30, 0, 8, 8)),
        Err(BridgeError::InvalidArgument { .. })
    ));
    assert!(!loader.is_failed());
    loader.read_region(Rect::new(24, 24, 8, 8)).unwrap();
}

#[test]
fn test_fail_on_sets_resilience() {
    for (fail_on, expected) in [
        (FailOn::None, Resilience::Resilient),
        (FailOn::Truncated, Resilience::Fast),
        (FailOn::Error, Resilience::Fast),
        (FailOn::Warning, Resilience::Fussy),
    ] {
        let (file, _) = rgb_file(16, 16);
        let codec = RawCodec::new();
        Jp2Loader::from_buffer(&codec, file, LoadOptions::default().fail_on(fail_on)).unwrap();
        assert_eq!(codec.stats().resilience, Some(expected));
    }
}

/// Alpha declared first in `cdef` still comes out after the colours.
#[test]
fn test_channel_definitions_reorder_bands() {
    let mut jp2 = layout(8, 8, 4, 8);
    jp2.channel_definitions = vec![
        ChannelDefinition {
            channel: 0,
            kind: ChannelKind::Opacity,
            association: 0,
        },
        ChannelDefinition {
            channel: 1,
            kind: ChannelKind::Colour,
            association: 1,
        },
        ChannelDefinition {
            channel: 2,
            kind: ChannelKind::Colour,
            association: 2,
        },
        ChannelDefinition {
            channel: 3,
            kind: ChannelKind::Colour,
            association: 3,
        },
    ];
    let samples = pattern(8, 8, 4, 8);
    let file = build_jp2(&jp2, vec![ComponentInfo::unsigned(8); 4], 3, (8, 8), &samples);
    let codec = RawCodec::new();
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap();
    assert_eq!(loader.descriptor().bands, 4);
    assert_eq!(loader.mapping().num_colours(), 3);

    let pixels = values(&loader.read_image().unwrap());
    for (i, pixel) in pixels.chunks(4).enumerate() {
        let stored = &samples[i * 4..i * 4 + 4];
        assert_eq!(pixel, &[stored[1], stored[2], stored[3], stored[0]]);
    }
}

#[test]
fn test_icc_profile_and_resolution_surface() {
    let mut profile = vec![0u8; 200];
    profile[16..20].copy_from_slice(b"RGB ");
    let mut jp2 = layout(16, 16, 3, 8);
    jp2.colour = ColourSpecification::icc(profile.clone());
    jp2.resolution = Some(ResolutionBox::from_pixels_per_metre(2000.0, 1000.0));
    let file = build_jp2(
        &jp2,
        vec![ComponentInfo::unsigned(8); 3],
        2,
        (16, 16),
        &pattern(16, 16, 3, 8),
    );
    let codec = RawCodec::new();
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap();
    let desc = loader.descriptor();
    assert_eq!(desc.interpretation, Interpretation::Srgb);
    assert!((desc.yres - 1.0).abs() < 1e-6);
    assert!((desc.xres - 2.0).abs() < 1e-6);
    let icc = loader
        .metadata()
        .into_iter()
        .find(|(key, _)| *key == META_ICC_NAME)
        .map(|(_, value)| value);
    assert_eq!(icc, Some(MetadataValue::Blob(profile.into())));
}

#[test]
fn test_cmyk_with_too_many_colours_rejected() {
    let mut jp2 = layout(8, 8, 5, 8);
    jp2.colour = ColourSpecification::enumerated(EnumCs::Cmyk);
    jp2.channel_definitions = (0..5)
        .map(|i| ChannelDefinition {
            channel: i,
            kind: ChannelKind::Colour,
            association: i + 1,
        })
        .collect();
    let file = build_jp2(
        &jp2,
        vec![ComponentInfo::unsigned(8); 5],
        3,
        (8, 8),
        &pattern(8, 8, 5, 8),
    );
    let err = Jp2Loader::from_buffer(&RawCodec::new(), file, LoadOptions::default()).unwrap_err();
    assert!(matches!(err, BridgeError::ColourBandMismatch { found: 5, expected: 4 }));
}

/// Deep components widen the pixel format to 32 bits.
#[test]
fn test_24_bit_components_load_as_uint() {
    let samples = pattern(8, 8, 1, 24);
    let file = build_jp2(
        &layout(8, 8, 1, 24),
        vec![ComponentInfo::unsigned(24)],
        3,
        (8, 8),
        &samples,
    );
    let loader = Jp2Loader::from_buffer(&RawCodec::new(), file, LoadOptions::default()).unwrap();
    assert_eq!(loader.descriptor().format, BandFormat::UInt);
    assert_eq!(loader.descriptor().bits_per_sample, 24);
    assert_eq!(values(&loader.read_image().unwrap()), samples);
}

#[test]
fn test_loader_releases_source() {
    let (file, _) = rgb_file(16, 16);
    let source = Source::new_from_memory(file);
    let loader =
        Jp2Loader::from_source(&RawCodec::new(), &source, LoadOptions::default()).unwrap();
    assert!(source.ref_count() > 1);
    drop(loader);
    assert_eq!(source.ref_count(), 1);
}

/// A forward-only reader is enough to load a file.
#[test]
fn test_load_from_sequential_reader() {
    let (file, samples) = rgb_file(16, 16);
    let source = Source::new_from_reader(Cursor::new(file));
    let loader =
        Jp2Loader::from_source(&RawCodec::new(), &source, LoadOptions::default()).unwrap();
    assert_eq!(values(&loader.read_image().unwrap()), samples);
}

#[test]
fn test_load_from_file() {
    let (file, samples) = rgb_file(24, 24);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pattern.jp2");
    std::fs::write(&path, &file).unwrap();

    assert!(j2kbridge_rs::is_a_file(&path));
    let loader = Jp2Loader::from_file(&RawCodec::new(), &path, LoadOptions::default()).unwrap();
    assert_eq!(loader.descriptor().filename.as_deref(), Some(path.as_path()));
    assert_eq!(values(&loader.read_image().unwrap()), samples);
}

/// Discarding more levels than the codestream has is reported by the codec
/// through the error sink.
#[test]
fn test_codec_rejects_excess_discard() {
    let samples = pattern(1024, 1024, 1, 8);
    let file = build_jp2(
        &layout(1024, 1024, 1, 8),
        vec![ComponentInfo::unsigned(8)],
        1,
        (1024, 1024),
        &samples,
    );
    let err = Jp2Loader::from_buffer(&RawCodec::new(), file, LoadOptions::default().page(3))
        .unwrap_err();
    match err {
        BridgeError::Codec { message } => {
            assert_eq!(message, "raw codec: cannot discard 3 of 1 levels")
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_warnings_do_not_fail() {
    let (file, samples) = rgb_file(16, 16);
    let codec = RawCodec::with_faults(Faults {
        warn_on_open: true,
        ..Faults::default()
    });
    let loader = Jp2Loader::from_buffer(&codec, file, LoadOptions::default()).unwrap();
    assert_eq!(values(&loader.read_image().unwrap()), samples);
}

#[test]
fn test_cache_hint_follows_tiles() {
    let (file, _) = grey16_file(512, 256);
    let loader = Jp2Loader::from_buffer(&RawCodec::new(), file, LoadOptions::default().page(1))
        .unwrap();
    let hint = loader.cache_hint();
    assert_eq!((hint.tile_width, hint.tile_height), (64, 64));
    assert_eq!(hint.max_tiles, 12);
}
