// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use bootimage::block::{self, ROLE_APPLICATION};
use bootimage::{
    build_image, ErrorKind, ImageDescriptor, ImageRole, PlatformLayout,
    Verdict,
};

const KEY: &[u8] = b"0123456789abcdef";

fn configs() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/configs")
}

fn load(name: &str) -> PlatformLayout {
    PlatformLayout::load(&configs(), name).unwrap()
}

#[test]
fn placement() {
    let layout = load("placement");
    let boot: Vec<u8> = (0..10).collect();
    let app: Vec<u8> = (100..105).collect();

    let out = build_image(
        &layout,
        ImageDescriptor::bootloader(boot.clone()),
        vec![ImageDescriptor::application(0, app.clone())],
        KEY,
    )
    .unwrap()
    .output;

    assert_eq!(out.base_address(), 0);
    assert_eq!(out.bytes().len(), 0x6000);
    assert_eq!(out.get(0x1000..0x100a).unwrap(), &boot[..]);
    assert_eq!(out.get(0x4000..0x4005).unwrap(), &app[..]);

    let block_len = block::header_len(4, 1, 16) + 2 * block::record_len(4, 32);
    for (addr, b) in (0u64..).zip(out.bytes()) {
        if addr < block_len
            || (0x1000..0x100a).contains(&addr)
            || (0x4000..0x4005).contains(&addr)
        {
            continue;
        }
        assert_eq!(*b, 0xa5, "byte at {:#x}", addr);
    }
}

#[test]
fn unknown_slot() {
    let layout = load("placement");
    let err = build_image(
        &layout,
        ImageDescriptor::bootloader(b"boot".to_vec()),
        vec![ImageDescriptor::application(99, b"app".to_vec())],
        KEY,
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::UnknownSlot);
    assert!(err.to_string().contains("99"));
}

#[test]
fn oversized_image() {
    let layout = load("placement");
    let err = build_image(
        &layout,
        ImageDescriptor::bootloader(b"boot".to_vec()),
        vec![ImageDescriptor::application(1, vec![0; 0x1001])],
        KEY,
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::ImageTooLarge);
}

#[test]
fn duplicate_slot() {
    let layout = load("placement");
    let err = build_image(
        &layout,
        ImageDescriptor::bootloader(b"boot".to_vec()),
        vec![
            ImageDescriptor::application(1, b"a".to_vec()),
            ImageDescriptor::application(1, b"b".to_vec()),
        ],
        KEY,
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::RegionOverflow);
}

#[test]
fn record_order_ignores_argument_order() {
    let layout = load("placement");
    let composed = build_image(
        &layout,
        ImageDescriptor::bootloader(b"boot".to_vec()),
        vec![
            ImageDescriptor::application(1, b"one".to_vec()),
            ImageDescriptor::application(0, b"zero".to_vec()),
        ],
        KEY,
    )
    .unwrap();

    let md = layout.metadata().region;
    let parsed =
        block::parse(&layout, composed.output.region(md).unwrap()).unwrap();
    let got: Vec<_> = parsed
        .records
        .iter()
        .map(|r| (r.role, r.length, r.load_address))
        .collect();
    assert_eq!(
        got,
        vec![
            (ImageRole::Bootloader, 4, 0x1000),
            (ImageRole::Application(0), 4, 0x4000),
            (ImageRole::Application(1), 3, 0x5000),
        ]
    );
    for (record, entry) in parsed.records.iter().zip(&composed.entries) {
        assert!(record.describes(entry));
    }
    assert_eq!(parsed.keys, vec![KEY.to_vec()]);
}

#[test]
fn deterministic() {
    let layout = load("placement");
    let run = || {
        build_image(
            &layout,
            ImageDescriptor::bootloader(b"boot".to_vec()),
            vec![
                ImageDescriptor::application(0, b"zero".to_vec()),
                ImageDescriptor::application(1, b"one".to_vec()),
            ],
            KEY,
        )
        .unwrap()
        .output
    };
    assert_eq!(run(), run());
}

#[test]
fn wide_big_endian() {
    let layout = load("wide");
    let composed = build_image(
        &layout,
        ImageDescriptor::bootloader(b"boot".to_vec()),
        vec![ImageDescriptor::application(5, b"application".to_vec())],
        KEY,
    )
    .unwrap();
    let out = &composed.output;

    // Header: magic, version 1, two entries.
    assert_eq!(
        out.get(0..8).unwrap(),
        &[0xb0, 0x07, 0xda, 0x7a, 0x00, 0x01, 0x00, 0x02]
    );
    // The second record starts after the header and the first record.
    let second = block::header_len(8, 3, 16) + block::record_len(8, 16);
    assert_eq!(
        out.get(second..second + 4).unwrap(),
        &[0x00, ROLE_APPLICATION as u8, 0x00, 0x05]
    );

    let (_, checks) = bootimage::verify(&layout, out, Some(KEY)).unwrap();
    assert!(checks.iter().all(|c| c.verdict == Verdict::Ok));
}

#[test]
fn missing_config_suggests_nearest() {
    let err = PlatformLayout::load(&configs(), "placment").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigNotFound);
    match err {
        bootimage::Error::ConfigNotFound { suggestion, .. } => {
            assert_eq!(suggestion.as_deref(), Some("placement"));
        }
        e => panic!("unexpected error {}", e),
    }

    let err = PlatformLayout::load(&configs(), "nothing-like-it").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigNotFound);
}

#[test]
fn declared_name_must_match() {
    let err = PlatformLayout::load(&configs(), "misnamed").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidLayout);
}

#[test]
fn missing_input_file() {
    let err = ImageDescriptor::from_file(
        ImageRole::Bootloader,
        &configs().join("no-such-image.bin"),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingInputFile);
}

#[test]
fn checked_in_configs_match_descriptions() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let generated =
        bootimage::platform::generate_dir(&root.join("platform_description"))
            .unwrap();
    assert!(!generated.is_empty());
    for (name, text) in &generated {
        let fresh = PlatformLayout::parse(name, text).unwrap();
        let shipped = PlatformLayout::load(&root.join("config"), name).unwrap();
        assert_eq!(fresh.regions(), shipped.regions(), "{}", name);
        assert_eq!(fresh.tag_size(), shipped.tag_size());
        assert_eq!(fresh.metadata(), shipped.metadata());
    }
}
