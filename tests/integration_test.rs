use stegim::builder::{parse_mask, parse_mode, BuilderError, StegBuilder};
use stegim::carrier::Carrier;
use stegim::crypto::{CipherId, KdfId, StaticPasswords};
use stegim::raster::{ImageRef, MemoryProvider, PixelBuf};
use stegim::section::HonorMask;
use stegim::session::Session;
use stegim::transform::Compression;
use stegim::usedmap::UsedMap;
use stegim::{Mode, ModeMask, ProtocolError};

fn carrier(w: u32, h: u32) -> PixelBuf {
    PixelBuf::filled(w, h, [120, 130, 140, 255])
}

fn no_passwords() -> StaticPasswords {
    StaticPasswords::new(Vec::<String>::new())
}

/// Saves with `pack`, feeds the written master back into the provider and
/// loads it again, so every test goes through the real wire.
fn roundtrip(
    provider: &mut MemoryProvider,
    pack: StegBuilder,
    unpack: StegBuilder,
    passwords: Vec<String>,
) -> (stegim::Protocol, stegim::Loaded) {
    let out = pack.save(provider, &mut no_passwords()).unwrap();
    for img in out.images {
        provider.insert(img.output.path.clone(), img.pixels);
    }
    let mut pw = StaticPasswords::new(passwords);
    unpack.load(provider, &mut pw).unwrap()
}

#[test]
fn test_file_and_text_roundtrip() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(64, 64));

    let data = b"Payload bytes for the container".to_vec();
    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .add_file_bytes("payload.bin", data.clone())
        .add_text("hidden note", HonorMask::default());
    let unpack = StegBuilder::new().input(ImageRef::new("out.png"));

    let (mut proto, loaded) = roundtrip(&mut provider, pack, unpack, vec![]);
    assert_eq!(loaded.files.len(), 1);
    assert_eq!(loaded.files[0].name, "payload.bin");
    assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), data);
    assert_eq!(loaded.texts.len(), 1);
    assert_eq!(proto.extract_text(&loaded.texts[0]).unwrap(), "hidden note");
}

#[test]
fn test_every_wire_version_roundtrips() {
    for minor in 0..=5u8 {
        let mut provider = MemoryProvider::new();
        provider.insert("in.png", carrier(48, 48));

        let data = vec![0xA5u8; 200];
        let pack = StegBuilder::new()
            .version(1, minor)
            .input(ImageRef::new("in.png"))
            .output(ImageRef::new("out.png"))
            .add_file_bytes("v.bin", data.clone())
            .add_text("per-version text", HonorMask::default());
        let unpack = StegBuilder::new().input(ImageRef::new("out.png"));

        let (mut proto, loaded) = roundtrip(&mut provider, pack, unpack, vec![]);
        assert_eq!(proto.version(), (1, minor));
        assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), data, "v1.{}", minor);
        assert_eq!(
            proto.extract_text(&loaded.texts[0]).unwrap(),
            "per-version text",
            "v1.{}",
            minor
        );
    }
}

#[test]
fn test_compression_gzip_and_brotli() {
    for comp in [
        Compression::Gzip { level: 6 },
        Compression::Brotli { level: 5, text: false },
    ] {
        let mut provider = MemoryProvider::new();
        provider.insert("in.png", carrier(64, 64));

        // highly compressible payload, larger than its stored form
        let data: Vec<u8> = std::iter::repeat(b"abcdefgh".as_slice())
            .take(128)
            .flatten()
            .copied()
            .collect();
        let pack = StegBuilder::new()
            .input(ImageRef::new("in.png"))
            .output(ImageRef::new("out.png"))
            .set_compression(comp)
            .add_file_bytes("big.txt", data.clone());
        let unpack = StegBuilder::new().input(ImageRef::new("out.png"));

        let (mut proto, loaded) = roundtrip(&mut provider, pack, unpack, vec![]);
        assert!(loaded.files[0].size < data.len() as u64, "{:?} did not shrink", comp);
        assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), data);
    }
}

#[test]
fn test_encrypted_roundtrip_aes_argon2id() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(96, 96));

    let data = b"secret manifest contents".to_vec();
    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .salt_phrase("test salt phrase")
        .set_encryption_with(CipherId::Aes256, KdfId::Argon2id, None, Some("hunter2"))
        .add_file_bytes("secret.bin", data.clone());
    let unpack = StegBuilder::new().input(ImageRef::new("out.png"));

    let (mut proto, loaded) =
        roundtrip(&mut provider, pack, unpack, vec!["hunter2".to_string()]);
    assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), data);
}

#[test]
fn test_wrong_password_does_not_yield_plaintext() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(96, 96));

    let data = b"secret manifest contents".to_vec();
    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .set_encryption_with(CipherId::Aes256, KdfId::Pbkdf2, None, Some("correct"))
        .add_file_bytes("secret.bin", data.clone());
    let unpack = StegBuilder::new().input(ImageRef::new("out.png"));

    let (mut proto, loaded) =
        roundtrip(&mut provider, pack, unpack, vec!["wrong".to_string()]);
    // padding may or may not survive the bad key; plaintext never does
    match proto.extract_file(&loaded.files[0]) {
        Ok(bytes) => assert_ne!(bytes, data),
        Err(_) => {}
    }
}

#[test]
fn test_legacy_md5_key_on_v1_0() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(96, 96));

    let data = b"legacy container".to_vec();
    let pack = StegBuilder::new()
        .version(1, 0)
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .set_encryption_with(CipherId::Aes256, KdfId::Pbkdf2, None, Some("oldpw"))
        .add_file_bytes("old.bin", data.clone());
    let unpack = StegBuilder::new().input(ImageRef::new("out.png"));

    let (mut proto, loaded) =
        roundtrip(&mut provider, pack, unpack, vec!["oldpw".to_string()]);
    assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), data);
}

#[test]
fn test_rand_and_shuffle_placement() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(80, 80));

    let data = b"scattered and shuffled".to_vec();
    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .global_rand("placement phrase")
        .global_shuffle("shuffle phrase")
        .add_file_bytes("s.bin", data.clone());
    let unpack = StegBuilder::new()
        .input(ImageRef::new("out.png"))
        .global_rand("placement phrase")
        .global_shuffle("shuffle phrase");

    let (mut proto, loaded) = roundtrip(&mut provider, pack, unpack, vec![]);
    assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), data);
}

#[test]
fn test_load_without_seed_phrase_fails() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(80, 80));

    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .global_rand("placement phrase")
        .add_file_bytes("s.bin", vec![7u8; 64]);
    let out = pack.save(&mut provider, &mut no_passwords()).unwrap();
    for img in out.images {
        provider.insert(img.output.path.clone(), img.pixels);
    }

    // without the phrase the header bits come from the wrong pixels
    match StegBuilder::new()
        .input(ImageRef::new("out.png"))
        .load(&mut provider, &mut no_passwords())
    {
        Err(_) => {}
        Ok((_, loaded)) => assert!(loaded.files.iter().all(|f| f.name != "s.bin")),
    }
}

#[test]
fn test_rect_and_cursor_stack() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(100, 100));

    let inside = b"confined".to_vec();
    let after = b"back outside".to_vec();
    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .cursor_push()
        .set_rect(40, 40, 30, 30)
        .add_file_bytes("inside.bin", inside.clone())
        .clear(stegim::ClearKind::Rect)
        .cursor_pop()
        .add_file_bytes("after.bin", after.clone());
    let unpack = StegBuilder::new().input(ImageRef::new("out.png"));

    let (mut proto, loaded) = roundtrip(&mut provider, pack, unpack, vec![]);
    assert_eq!(loaded.files.len(), 2);
    assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), inside);
    assert_eq!(proto.extract_file(&loaded.files[1]).unwrap(), after);
}

#[test]
fn test_partial_file_in_two_pieces() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(80, 80));

    let data: Vec<u8> = (0..=255u8).cycle().take(500).collect();
    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .add_partial_file("split.bin", data.clone(), 3)
        .add_piece(3, 200)
        .add_text("interleaved", HonorMask::default())
        .add_piece(3, 0);
    let unpack = StegBuilder::new().input(ImageRef::new("out.png"));

    let (mut proto, loaded) = roundtrip(&mut provider, pack, unpack, vec![]);
    assert_eq!(loaded.partials.len(), 1);
    assert_eq!(loaded.partials[0].name, "split.bin");
    assert_eq!(loaded.partials[0].index, 3);
    assert_eq!(loaded.partials[0].piece_count(), 2);
    assert_eq!(proto.extract_partial(&loaded.partials[0]).unwrap(), data);
    assert_eq!(proto.extract_text(&loaded.texts[0]).unwrap(), "interleaved");
}

#[test]
fn test_partial_piece_wire_accounting_v1_0() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(32, 32));

    // 32 header + 9 count + 89 PARTIALFILE (id 9, size 24, "s.bin\0" 48,
    // index 8) + 74 PIECE (id 9, file index 8, piece index 8, last 1,
    // size 24, 3 body bytes 24) = 204 bits, exactly 68 pixels at 3 bpp
    let pack = StegBuilder::new()
        .version(1, 0)
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .add_partial_file("s.bin", vec![1, 2, 3], 0)
        .add_piece(0, 0);
    let out = pack.save(&mut provider, &mut no_passwords()).unwrap();
    assert_eq!(out.stats[0].payload_pixels, 68);

    for img in out.images {
        provider.insert(img.output.path.clone(), img.pixels);
    }
    let (mut proto, loaded) = StegBuilder::new()
        .input(ImageRef::new("out.png"))
        .load(&mut provider, &mut no_passwords())
        .unwrap();
    assert_eq!(proto.extract_partial(&loaded.partials[0]).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_reader_rejects_modemask_on_v1_0() {
    // hand-built v1.0 container declaring a single MODEMASK section
    let mut w = Carrier::new("w", carrier(32, 32), true);
    let mut s = Session::default();
    w.write_int(&mut s, 1, 6).unwrap();
    w.write_int(&mut s, 0, 6).unwrap();
    w.write_int(&mut s, Mode::default().wire() as u64, 6).unwrap();
    w.write_int(&mut s, 0, 14).unwrap();
    w.write_int(&mut s, 1, 9).unwrap();
    w.write_int(&mut s, stegim::section::SEC_MODEMASK as u64, 9).unwrap();
    w.write_int(&mut s, 0b010, 3).unwrap();
    w.flush(&mut s).unwrap();

    let mut provider = MemoryProvider::new();
    provider.insert("craft.png", w.into_pixels());
    let res = StegBuilder::new()
        .input(ImageRef::new("craft.png"))
        .load(&mut provider, &mut no_passwords());
    assert!(matches!(
        res,
        Err(BuilderError::Protocol(ProtocolError::UnknownSection { .. }))
    ));
}

#[test]
fn test_reader_rejects_shuffle_before_v1_4() {
    // hand-built v1.3 container declaring a single SHUFFLE section
    let mut w = Carrier::new("w", carrier(32, 32), true);
    let mut s = Session::default();
    w.write_int(&mut s, 1, 6).unwrap();
    w.write_int(&mut s, 3, 6).unwrap();
    w.write_int(&mut s, Mode::default().wire() as u64, 6).unwrap();
    w.write_int(&mut s, (ModeMask::default().wire() as u64) << 8, 14).unwrap();
    w.write_vlq(&mut s, 1, 4).unwrap();
    w.write_int(&mut s, stegim::section::SEC_SHUFFLE as u64, 9).unwrap();
    w.write_int(&mut s, 12345, 32).unwrap();
    w.flush(&mut s).unwrap();

    let mut provider = MemoryProvider::new();
    provider.insert("craft.png", w.into_pixels());
    let res = StegBuilder::new()
        .input(ImageRef::new("craft.png"))
        .load(&mut provider, &mut no_passwords());
    assert!(matches!(
        res,
        Err(BuilderError::Protocol(ProtocolError::UnknownSection { .. }))
    ));
}

#[test]
fn test_none_pipeline_types_are_no_ops() {
    // COMPRESSION and ENCRYPTION sections carrying type NONE clear the
    // pipeline without consuming more fields or asking for a password
    let mut w = Carrier::new("w", carrier(32, 32), true);
    let mut s = Session::default();
    w.write_int(&mut s, 1, 6).unwrap();
    w.write_int(&mut s, 0, 6).unwrap();
    w.write_int(&mut s, Mode::default().wire() as u64, 6).unwrap();
    w.write_int(&mut s, 0, 14).unwrap();
    w.write_int(&mut s, 3, 9).unwrap();
    w.write_int(&mut s, stegim::section::SEC_COMPRESSION as u64, 9).unwrap();
    w.write_int(&mut s, 0, 4).unwrap();
    w.write_int(&mut s, stegim::section::SEC_ENCRYPTION as u64, 9).unwrap();
    w.write_int(&mut s, 0, 4).unwrap();
    w.write_int(&mut s, stegim::section::SEC_TEXT as u64, 9).unwrap();
    w.write_int(&mut s, 0, 4).unwrap();
    w.write_int(&mut s, 2, 16).unwrap();
    w.write_bytes(&mut s, b"hi").unwrap();
    w.flush(&mut s).unwrap();

    let mut provider = MemoryProvider::new();
    provider.insert("craft.png", w.into_pixels());
    let (mut proto, loaded) = StegBuilder::new()
        .input(ImageRef::new("craft.png"))
        .load(&mut provider, &mut no_passwords())
        .unwrap();
    assert_eq!(proto.extract_text(&loaded.texts[0]).unwrap(), "hi");
}

#[test]
fn test_image_table_second_carrier() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(64, 64));
    provider.insert("side.png", carrier(48, 48));

    let side_text = "lives in the side carrier";
    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .set_image_table(vec![stegim::section::TableSpec {
            input: ImageRef::new("side.png"),
            output: ImageRef::new("side_out.png"),
        }])
        .cursor_move_image(0)
        .add_text(side_text, HonorMask::default());

    let out = pack.save(&mut provider, &mut no_passwords()).unwrap();
    assert_eq!(out.images.len(), 2);
    for img in out.images {
        provider.insert(img.output.path.clone(), img.pixels);
    }

    let mut pw = no_passwords();
    let (mut proto, loaded) = StegBuilder::new()
        .input(ImageRef::new("out.png"))
        .load(&mut provider, &mut pw)
        .unwrap();
    assert_eq!(proto.extract_text(&loaded.texts[0]).unwrap(), side_text);
}

#[test]
fn test_used_map_sidecar() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(64, 64));

    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png").with_map("out.map"))
        .add_file_bytes("a.bin", vec![1u8; 100]);
    let out = pack.save(&mut provider, &mut no_passwords()).unwrap();

    assert_eq!(out.maps.len(), 1);
    assert_eq!(out.maps[0].0, "out.map");
    let map = UsedMap::from_bytes(&out.maps[0].1, true).unwrap();
    assert!(map.payload_count() > 0);
    assert!(map.marked_len() >= map.payload_count() as usize);
}

#[test]
fn test_preloaded_map_skips_occupied_pixels() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(64, 64));

    // first pass claims pixels and emits a sidecar
    let first = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("mid.png").with_map("mid.map"))
        .add_file_bytes("one.bin", vec![9u8; 80]);
    let out = first.save(&mut provider, &mut no_passwords()).unwrap();
    let map_bytes = out.maps[0].1.clone();
    let mid = out.images.into_iter().next().unwrap().pixels;
    provider.insert("mid.png", mid);
    provider.insert_map("mid.map", map_bytes);

    // second pass starts past the first container's pixels
    let data = b"second payload".to_vec();
    let second = StegBuilder::new()
        .input(ImageRef::new("mid.png").with_map("mid.map"))
        .output(ImageRef::new("out.png"))
        .add_file_bytes("two.bin", data.clone());
    let out = second.save(&mut provider, &mut no_passwords()).unwrap();
    for img in out.images {
        provider.insert(img.output.path.clone(), img.pixels);
    }

    // the first container still loads from the second output
    let (mut proto, loaded) = StegBuilder::new()
        .input(ImageRef::new("out.png"))
        .load(&mut provider, &mut no_passwords())
        .unwrap();
    assert_eq!(loaded.files[0].name, "one.bin");
    assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), vec![9u8; 80]);

    // and the second loads once the map moves the reader past it
    let (mut proto, loaded) = StegBuilder::new()
        .input(ImageRef::new("out.png").with_map("mid.map"))
        .load(&mut provider, &mut no_passwords())
        .unwrap();
    assert_eq!(loaded.files[0].name, "two.bin");
    assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), data);
}

#[test]
fn test_dry_run_reports_stats_without_images() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(64, 64));

    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .dry_run(true)
        .add_file_bytes("a.bin", vec![1u8; 100]);
    let out = pack.save(&mut provider, &mut no_passwords()).unwrap();

    assert!(out.images.is_empty());
    assert!(out.maps.is_empty());
    assert_eq!(out.stats.len(), 1);
    assert!(out.stats[0].payload_pixels > 0);
    assert!(out.stats[0].visited_pixels >= out.stats[0].payload_pixels);
    assert_eq!(out.stats[0].total_pixels, 64 * 64);
}

#[test]
fn test_deep_mode_section_switch() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(32, 32));

    // a 32x32 carrier at 3 bpp cannot hold 600 bytes; 15 bpp can
    let data = vec![0x5Au8; 600];
    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .set_mode_section(parse_mode("15/15").unwrap())
        .add_file_bytes("wide.bin", data.clone());
    let unpack = StegBuilder::new().input(ImageRef::new("out.png"));

    let (mut proto, loaded) = roundtrip(&mut provider, pack, unpack, vec![]);
    assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), data);
}

#[test]
fn test_mode_mask_section_restricts_channels() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(64, 64));

    let data = b"green channel only".to_vec();
    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .set_mask_section(parse_mask("g").unwrap())
        .add_file_bytes("g.bin", data.clone());
    let out = pack.save(&mut provider, &mut no_passwords()).unwrap();
    let saved = out.images.into_iter().next().unwrap().pixels;

    // red and blue stay untouched once the mask section lands
    let clean = carrier(64, 64);
    let mut header_px = 0u64;
    let mut r_or_b_changed = 0u64;
    for y in 0..64u16 {
        for x in 0..64u16 {
            let a = saved.get(x, y);
            let b = clean.get(x, y);
            if a != b {
                header_px += 1;
                if a[0] != b[0] || a[2] != b[2] {
                    r_or_b_changed += 1;
                }
            }
        }
    }
    assert!(header_px > 0);
    // only the header and the mask section itself may touch r/b
    assert!(r_or_b_changed < 30, "r/b changed on {} pixels", r_or_b_changed);

    provider.insert("out.png", saved);
    let (mut proto, loaded) = StegBuilder::new()
        .input(ImageRef::new("out.png"))
        .load(&mut provider, &mut no_passwords())
        .unwrap();
    assert_eq!(proto.extract_file(&loaded.files[0]).unwrap(), data);
}

#[test]
fn test_capacity_exhaustion_is_an_error() {
    let mut provider = MemoryProvider::new();
    provider.insert("in.png", carrier(8, 8));

    let pack = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .add_file_bytes("toolarge.bin", vec![0u8; 4096]);
    assert!(pack.save(&mut provider, &mut no_passwords()).is_err());
}

#[test]
fn test_garbage_image_is_rejected() {
    let mut provider = MemoryProvider::new();
    // saturated pixels decode as a bogus version or reserved bits
    provider.insert("junk.png", PixelBuf::filled(32, 32, [255, 255, 255, 255]));

    let res = StegBuilder::new()
        .input(ImageRef::new("junk.png"))
        .load(&mut provider, &mut no_passwords());
    assert!(res.is_err());
}
