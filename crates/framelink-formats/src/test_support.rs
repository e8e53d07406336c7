//! Fixture builders shared by the unit tests.

use std::path::PathBuf;

pub(crate) fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "fl-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// Camera recording with a 1024-byte header and a timestamp after each frame.
pub(crate) struct RecordingFixture {
    pub format: u32,
    pub declared_frames: u32,
    pub nx: u32,
    pub ny: u32,
    pub date: &'static str,
    pub comment: &'static str,
    /// Raw frame payloads, each followed by `t * 10` ms.
    pub frames: Vec<Vec<u8>>,
}

impl RecordingFixture {
    pub fn u16_frames(nx: u32, ny: u32, frames: usize) -> Self {
        let frames = (0..frames)
            .map(|t| {
                (0..nx * ny)
                    .flat_map(|i| ((t as u32 * 1000 + i) as u16).to_le_bytes())
                    .collect()
            })
            .collect::<Vec<Vec<u8>>>();
        Self {
            format: 3,
            declared_frames: frames.len() as u32,
            nx,
            ny,
            date: "2021-04-01 10:00",
            comment: "",
            frames,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 1024];
        let mut header = vec![b'f'];
        header.extend_from_slice(&0x1A2B_3C4Du32.to_le_bytes());
        for field in [
            self.declared_frames,
            self.nx,
            self.ny,
            self.format,
            1,
            100,
        ] {
            header.extend_from_slice(&field.to_le_bytes());
        }
        header.extend_from_slice(self.date.as_bytes());
        header.push(0);
        header.extend_from_slice(self.comment.as_bytes());
        header.push(0);
        out[..header.len()].copy_from_slice(&header);

        for (t, frame) in self.frames.iter().enumerate() {
            out.extend_from_slice(frame);
            out.extend_from_slice(&(t as u64 * 10).to_le_bytes());
        }
        out
    }
}

/// A `.npy` v1 file image.
pub(crate) fn npy_bytes(descr: &str, fortran_order: bool, shape: &[usize], body: &[u8]) -> Vec<u8> {
    let shape = match shape {
        [n] => format!("({n},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let order = if fortran_order { "True" } else { "False" };
    let mut header = format!("{{'descr': '{descr}', 'fortran_order': {order}, 'shape': {shape}, }}");
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut out = b"\x93NUMPY\x01\x00".to_vec();
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    out
}

pub(crate) fn f32_bytes(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
    values.into_iter().flat_map(f32::to_le_bytes).collect()
}
