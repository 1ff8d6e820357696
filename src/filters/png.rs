use std::io::{Error, ErrorKind, Result};
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    None,
    Sub,
    Up,
    Avg,
    Paeth,
}

impl TryFrom<u8> for FilterType {
    type Error = ();

    fn try_from(n: u8) -> std::result::Result<FilterType, ()> {
        match n {
            0 => Ok(FilterType::None),
            1 => Ok(FilterType::Sub),
            2 => Ok(FilterType::Up),
            3 => Ok(FilterType::Avg),
            4 => Ok(FilterType::Paeth),
            _ => Err(()),
        }
    }
}

fn paeth_predict(left: u8, above: u8, upperleft: u8) -> u8 {
    let expand_left = i16::from(left);
    let expand_above = i16::from(above);
    let expand_upperleft = i16::from(upperleft);

    let initial_estimate = expand_left + expand_above - expand_upperleft;

    let dist_left = (initial_estimate - expand_left).abs();
    let dist_above = (initial_estimate - expand_above).abs();
    let dist_upperleft = (initial_estimate - expand_upperleft).abs();

    if dist_left <= dist_above && dist_left <= dist_upperleft {
        left
    } else if dist_above <= dist_upperleft {
        above
    } else {
        upperleft
    }
}

pub fn decode_row(filter: FilterType, bpp: usize, previous: &[u8], current: &mut [u8]) {
    use self::FilterType::*;
    let len = current.len();
    let bpp = bpp.min(len);

    match filter {
        None => (),
        Sub => {
            for i in bpp..len {
                current[i] = current[i].wrapping_add(current[i - bpp]);
            }
        }
        Up => {
            for i in 0..len {
                current[i] = current[i].wrapping_add(previous[i]);
            }
        }
        Avg => {
            for i in 0..bpp {
                current[i] = current[i].wrapping_add(previous[i] / 2);
            }

            for i in bpp..len {
                let average = (u16::from(current[i - bpp]) + u16::from(previous[i])) / 2;
                current[i] = current[i].wrapping_add(average as u8);
            }
        }
        Paeth => {
            for i in 0..bpp {
                current[i] = current[i].wrapping_add(paeth_predict(0, previous[i], 0));
            }

            for i in bpp..len {
                current[i] = current[i].wrapping_add(paeth_predict(current[i - bpp], previous[i], previous[i - bpp]));
            }
        }
    }
}

/// Undo PNG row prediction. Every row of `bytes_per_row` bytes is preceded by its filter type byte.
pub fn decode_frame(content: &[u8], bytes_per_pixel: usize, bytes_per_row: usize) -> Result<Vec<u8>> {
    let mut previous = vec![0_u8; bytes_per_row];
    let mut current = vec![0_u8; bytes_per_row];
    let mut decoded = Vec::with_capacity(content.len());
    let mut pos = 0;
    while pos < content.len() {
        let filter: FilterType = content[pos].try_into().map_err(|_| {
            Error::new(
                ErrorKind::InvalidData,
                format!("invalid PNG filter type ({})", content[pos]),
            )
        })?;
        pos += 1;

        let row = content
            .get(pos..pos + bytes_per_row)
            .ok_or_else(|| Error::new(ErrorKind::UnexpectedEof, "truncated predictor row"))?;
        current.copy_from_slice(row);
        pos += bytes_per_row;

        decode_row(filter, bytes_per_pixel, previous.as_slice(), current.as_mut_slice());
        decoded.extend_from_slice(current.as_slice());
        mem::swap(&mut previous, &mut current);
    }
    Ok(decoded)
}

/// Undo TIFF predictor 2 (horizontal differencing) for 8 bit components.
pub fn decode_tiff_horizontal(mut data: Vec<u8>, colors: usize, bytes_per_row: usize) -> Vec<u8> {
    if bytes_per_row == 0 {
        return data;
    }
    for row in data.chunks_mut(bytes_per_row) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    data
}
