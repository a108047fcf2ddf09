//! Helper functions to prepare the program image for the bootloader.

use std::fs;

use log::{debug, warn};

use crate::UploadError;

/// Reads the whole image at `path` in memory.
pub(crate) fn load_image(path: &str) -> Result<Vec<u8>, UploadError> {
    let data = fs::read(path).map_err(|source| {
        debug!("`{}` error: {}", path, source);
        UploadError::SourceNotFound {
            path: path.to_owned(),
            source,
        }
    })?;
    debug!("{} bytes read from `{}`", data.len(), path);
    Ok(data)
}

/// Zero pads `image` up to `target_size` and returns the number of padding
/// bytes added. Images already at or above the target size are left as they
/// are; the bootloader will be sent the whole thing.
pub(crate) fn pad_image(image: &mut Vec<u8>, target_size: usize) -> usize {
    let size = image.len();
    if size > target_size {
        warn!(
            "image is {} bytes, larger than the {} bytes of device memory; sending it as is",
            size, target_size
        );
        return 0;
    }
    image.resize(target_size, 0);
    target_size - size
}

/// Splits `payload` in chunks of `chunk_size` bytes, the last one possibly
/// shorter.
pub(crate) fn chunks(payload: &[u8], chunk_size: usize) -> std::slice::Chunks<'_, u8> {
    payload.chunks(chunk_size.max(1))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn short_images_are_padded_to_target() {
    for len in &[0usize, 1, 1000, 16383] {
        let mut image = vec![0xa5; *len];
        let padding = pad_image(&mut image, 16384);
        assert_eq!(image.len(), 16384);
        assert_eq!(padding, 16384 - len);
        assert!(image[..*len].iter().all(|b| *b == 0xa5));
        assert!(image[*len..].iter().all(|b| *b == 0));
    }
}

#[test]
fn large_images_are_left_alone() {
    for len in &[16384usize, 16385, 20000] {
        let mut image = vec![0x5a; *len];
        assert_eq!(pad_image(&mut image, 16384), 0);
        assert_eq!(image.len(), *len);
        assert!(image.iter().all(|b| *b == 0x5a));
    }
}

#[test]
fn chunk_coverage() {
    for len in &[1usize, 1023, 1024, 1025, 16384, 17000] {
        let payload: Vec<u8> = (0..*len).map(|i| (i % 251) as u8).collect();
        let parts: Vec<&[u8]> = chunks(&payload, 1024).collect();

        assert_eq!(parts.len(), (len + 1023) / 1024);
        let (last, full) = parts.split_last().unwrap();
        assert!(full.iter().all(|c| c.len() == 1024));
        let expected_last = if len % 1024 == 0 { 1024 } else { len % 1024 };
        assert_eq!(last.len(), expected_last);
        assert_eq!(parts.concat(), payload);
    }
}

#[test]
fn missing_image() {
    let err = load_image("this/image/does/not/exist.bin").unwrap_err();
    match err {
        UploadError::SourceNotFound { path, .. } => {
            assert_eq!(path, "this/image/does/not/exist.bin")
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn image_is_read_whole() {
    let path = std::env::temp_dir().join(format!("rvboot-image-{}.bin", std::process::id()));
    fs::write(&path, b"\x13\x00\x00\x00\x6f").unwrap();
    let data = load_image(path.to_str().unwrap()).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(data, b"\x13\x00\x00\x00\x6f");
}
