// Minimal NIfTI-1 volume codec, just enough to shuttle T1w volumes through
// the motion simulation. Little-endian files only; voxel data is decoded to
// f32 in column-major order with header scaling applied.

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array3, ShapeBuilder};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

const HEADER_SIZE: usize = 348;
const MAGIC_OFFSET: usize = 344;

// header field offsets per the NIfTI-1 standard
const DIM_OFFSET: usize = 40;
const DATATYPE_OFFSET: usize = 70;
const BITPIX_OFFSET: usize = 72;
const VOX_OFFSET_OFFSET: usize = 108;
const SCL_SLOPE_OFFSET: usize = 112;
const SCL_INTER_OFFSET: usize = 116;

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;
const DT_UINT16: i16 = 512;

#[derive(Debug, Error)]
pub enum NiftiError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file too short to hold a nifti-1 header")]
    TruncatedHeader,
    #[error("not a nifti-1 file (bad magic)")]
    BadMagic,
    #[error("big-endian nifti files are not supported")]
    BigEndian,
    #[error("unsupported nifti datatype code {0}")]
    UnsupportedDatatype(i16),
    #[error("expected a 3-D volume, got dim[0] = {0}")]
    NotThreeDimensional(i16),
    #[error("voxel data is truncated: expected {expected} bytes, got {actual}")]
    TruncatedData { expected: usize, actual: usize },
}

/// a 3-D volume with its raw nifti-1 header carried along so that geometry
/// fields survive a read-modify-write cycle untouched
#[derive(Debug, Clone)]
pub struct NiftiVolume {
    header: [u8; HEADER_SIZE],
    /// voxel data in column-major (x fastest) order
    pub data: Array3<f32>,
}

impl NiftiVolume {
    /// wraps freshly computed voxel data in the header of an existing volume
    pub fn with_data(&self, data: Array3<f32>) -> NiftiVolume {
        assert_eq!(self.data.dim(), data.dim(), "volume dimensions must match");
        NiftiVolume {
            header: self.header,
            data,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.data.dim().into()
    }

    /// builds a volume from scratch with a default header; used by tests and
    /// synthetic data generation
    pub fn from_array(data: Array3<f32>) -> NiftiVolume {
        let mut header = [0u8; HEADER_SIZE];
        LittleEndian::write_i32(&mut header[0..4], HEADER_SIZE as i32);
        let (nx, ny, nz) = data.dim();
        let dim = [3i16, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
        for (i, d) in dim.iter().enumerate() {
            LittleEndian::write_i16(&mut header[DIM_OFFSET + 2 * i..], *d);
        }
        // unit voxel spacing
        for i in 1..4 {
            LittleEndian::write_f32(&mut header[76 + 4 * i..], 1.);
        }
        LittleEndian::write_i16(&mut header[DATATYPE_OFFSET..], DT_FLOAT32);
        LittleEndian::write_i16(&mut header[BITPIX_OFFSET..], 32);
        LittleEndian::write_f32(&mut header[VOX_OFFSET_OFFSET..], 352.);
        LittleEndian::write_f32(&mut header[SCL_SLOPE_OFFSET..], 1.);
        header[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(b"n+1\0");
        NiftiVolume { header, data }
    }
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

fn read_all(path: &Path) -> Result<Vec<u8>, NiftiError> {
    let mut f = File::open(path)?;
    let mut bytes = Vec::new();
    if is_gzipped(path) {
        GzDecoder::new(&mut f).read_to_end(&mut bytes)?;
    } else {
        f.read_to_end(&mut bytes)?;
    }
    Ok(bytes)
}

/// reads a `.nii` or `.nii.gz` volume into an f32 array in column-major order
pub fn read_volume(path: impl AsRef<Path>) -> Result<NiftiVolume, NiftiError> {
    let bytes = read_all(path.as_ref())?;
    if bytes.len() < HEADER_SIZE {
        return Err(NiftiError::TruncatedHeader);
    }
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&bytes[..HEADER_SIZE]);

    let sizeof_hdr = LittleEndian::read_i32(&header[0..4]);
    if sizeof_hdr != HEADER_SIZE as i32 {
        // a byte-swapped sizeof_hdr means the file is big-endian
        if sizeof_hdr.swap_bytes() == HEADER_SIZE as i32 {
            return Err(NiftiError::BigEndian);
        }
        return Err(NiftiError::BadMagic);
    }
    let magic = &header[MAGIC_OFFSET..MAGIC_OFFSET + 4];
    if magic != b"n+1\0" && magic != b"ni1\0" {
        return Err(NiftiError::BadMagic);
    }

    let ndim = LittleEndian::read_i16(&header[DIM_OFFSET..]);
    // trailing singleton dimensions are tolerated
    let mut dims = [1usize; 3];
    for (i, d) in dims.iter_mut().enumerate() {
        let v = LittleEndian::read_i16(&header[DIM_OFFSET + 2 * (i + 1)..]);
        *d = v.max(1) as usize;
    }
    if ndim < 1 || ndim > 7 {
        return Err(NiftiError::NotThreeDimensional(ndim));
    }
    for i in 3..ndim as usize {
        let v = LittleEndian::read_i16(&header[DIM_OFFSET + 2 * (i + 1)..]);
        if v > 1 {
            return Err(NiftiError::NotThreeDimensional(ndim));
        }
    }

    let datatype = LittleEndian::read_i16(&header[DATATYPE_OFFSET..]);
    let vox_offset = LittleEndian::read_f32(&header[VOX_OFFSET_OFFSET..]) as usize;
    let vox_offset = vox_offset.max(HEADER_SIZE + 4);
    let slope = LittleEndian::read_f32(&header[SCL_SLOPE_OFFSET..]);
    let inter = LittleEndian::read_f32(&header[SCL_INTER_OFFSET..]);
    // a zero slope means "no scaling" per the standard
    let slope = if slope == 0. { 1. } else { slope };

    let n_vox = dims.iter().product::<usize>();
    let bytes_per_vox = match datatype {
        DT_UINT8 => 1,
        DT_INT16 | DT_UINT16 => 2,
        DT_INT32 | DT_FLOAT32 => 4,
        DT_FLOAT64 => 8,
        other => return Err(NiftiError::UnsupportedDatatype(other)),
    };
    let expected = n_vox * bytes_per_vox;
    let raw = bytes
        .get(vox_offset..vox_offset + expected)
        .ok_or(NiftiError::TruncatedData {
            expected,
            actual: bytes.len().saturating_sub(vox_offset),
        })?;

    let mut values = vec![0f32; n_vox];
    match datatype {
        DT_UINT8 => {
            for (v, b) in values.iter_mut().zip(raw) {
                *v = *b as f32;
            }
        }
        DT_INT16 => {
            for (v, b) in values.iter_mut().zip(raw.chunks_exact(2)) {
                *v = LittleEndian::read_i16(b) as f32;
            }
        }
        DT_UINT16 => {
            for (v, b) in values.iter_mut().zip(raw.chunks_exact(2)) {
                *v = LittleEndian::read_u16(b) as f32;
            }
        }
        DT_INT32 => {
            for (v, b) in values.iter_mut().zip(raw.chunks_exact(4)) {
                *v = LittleEndian::read_i32(b) as f32;
            }
        }
        DT_FLOAT32 => LittleEndian::read_f32_into(raw, &mut values),
        DT_FLOAT64 => {
            for (v, b) in values.iter_mut().zip(raw.chunks_exact(8)) {
                *v = LittleEndian::read_f64(b) as f32;
            }
        }
        _ => unreachable!(),
    }
    if slope != 1. || inter != 0. {
        values.iter_mut().for_each(|v| *v = *v * slope + inter);
    }

    let data = Array3::from_shape_vec((dims[0], dims[1], dims[2]).f(), values)
        .expect("shape and buffer length agree");
    Ok(NiftiVolume { header, data })
}

/// writes a volume as float32, gzip-compressed when the path ends in `.gz`.
/// Geometry fields are carried over from the source header; datatype and
/// scaling fields are rewritten for the float32 payload
pub fn write_volume(path: impl AsRef<Path>, vol: &NiftiVolume) -> Result<(), NiftiError> {
    let path = path.as_ref();
    let mut header = vol.header;
    LittleEndian::write_i32(&mut header[0..4], HEADER_SIZE as i32);
    LittleEndian::write_i16(&mut header[DATATYPE_OFFSET..], DT_FLOAT32);
    LittleEndian::write_i16(&mut header[BITPIX_OFFSET..], 32);
    LittleEndian::write_f32(&mut header[VOX_OFFSET_OFFSET..], 352.);
    LittleEndian::write_f32(&mut header[SCL_SLOPE_OFFSET..], 1.);
    LittleEndian::write_f32(&mut header[SCL_INTER_OFFSET..], 0.);
    header[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(b"n+1\0");

    let data = vol
        .data
        .as_slice_memory_order()
        .expect("volume buffer is contiguous");
    let mut payload = vec![0u8; data.len() * size_of::<f32>()];
    LittleEndian::write_f32_into(data, &mut payload);

    let f = File::create(path)?;
    if is_gzipped(path) {
        let mut enc = GzEncoder::new(f, Compression::default());
        write_body(&mut enc, &header, &payload)?;
        enc.finish()?;
    } else {
        let mut f = f;
        write_body(&mut f, &header, &payload)?;
    }
    Ok(())
}

fn write_body(w: &mut impl Write, header: &[u8], payload: &[u8]) -> std::io::Result<()> {
    w.write_all(header)?;
    // empty extension flag pads the offset to 352
    w.write_all(&[0u8; 4])?;
    w.write_all(payload)
}
