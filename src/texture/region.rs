//! Layout math for strided texel blocks.

/// Bytes spanned by a block of `extents` texels laid out with `strides`.
///
/// `strides[i]` must be at least the span of one index of dimension `i + 1`,
/// otherwise rows would overlap.
pub(crate) fn required_len(
    extents: &[u32],
    strides: &[u32],
    element_size: usize,
) -> Result<usize, &'static str> {
    let Some((&first, rest)) = extents.split_first() else {
        return Ok(0);
    };
    if strides.len() != rest.len() {
        return Err("strides must have one entry per dimension after the first");
    }
    let mut span = (first as usize)
        .checked_mul(element_size)
        .ok_or("texture is too large")?;
    for (&extent, &stride) in rest.iter().zip(strides) {
        let stride = stride as usize;
        if stride < span {
            return Err("stride is smaller than the data it spans");
        }
        span = stride
            .checked_mul(extent.saturating_sub(1) as usize)
            .and_then(|bytes| bytes.checked_add(span))
            .ok_or("texture is too large")?;
    }
    Ok(span)
}

/// Tightly packed strides for `extents`.
pub(crate) fn packed_strides(
    extents: &[u32],
    element_size: usize,
) -> Result<Vec<u32>, &'static str> {
    let mut strides = Vec::with_capacity(extents.len().saturating_sub(1));
    let mut span = element_size as u64;
    for &extent in &extents[..extents.len().saturating_sub(1)] {
        span *= u64::from(extent);
        strides.push(u32::try_from(span).map_err(|_| "texture is too large")?);
    }
    Ok(strides)
}

/// A validated update target inside a texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Region {
    pub(crate) minimum: Vec<u32>,
    pub(crate) size: Vec<u32>,
}

impl Region {
    /// Resolves an update request against `extents`. Either bound missing
    /// selects the whole texture.
    pub(crate) fn resolve(
        extents: &[u32],
        minimum: Option<&[u32]>,
        maximum: Option<&[u32]>,
    ) -> Result<Self, &'static str> {
        let (Some(minimum), Some(maximum)) = (minimum, maximum) else {
            return Ok(Self {
                minimum: vec![0; extents.len()],
                size: extents.to_vec(),
            });
        };
        if minimum.len() != extents.len() || maximum.len() != extents.len() {
            return Err("update extents must have one entry per dimension");
        }
        let mut size = Vec::with_capacity(extents.len());
        for ((&lo, &hi), &extent) in minimum.iter().zip(maximum).zip(extents) {
            if lo >= hi || hi > extent {
                return Err("update region is outside the texture");
            }
            size.push(hi - lo);
        }
        Ok(Self {
            minimum: minimum.to_vec(),
            size,
        })
    }
}

/// Copies `region` from a block laid out with `src_strides` into a texture
/// laid out with `dst_strides`. Both sides must already be bounds checked.
pub(crate) fn copy_region(
    dst: &mut [u8],
    dst_strides: &[u32],
    src: &[u8],
    src_strides: &[u32],
    region: &Region,
    element_size: usize,
) {
    let row = region.size[0] as usize * element_size;
    let row_start = region.minimum[0] as usize * element_size;
    let mut index = vec![0u32; region.size.len() - 1];

    loop {
        let src_offset: usize = index
            .iter()
            .zip(src_strides)
            .map(|(&i, &stride)| i as usize * stride as usize)
            .sum();
        let dst_offset: usize = row_start
            + index
                .iter()
                .zip(&region.minimum[1..])
                .zip(dst_strides)
                .map(|((&i, &lo), &stride)| (lo + i) as usize * stride as usize)
                .sum::<usize>();
        dst[dst_offset..dst_offset + row].copy_from_slice(&src[src_offset..src_offset + row]);

        let mut dim = 0;
        loop {
            if dim == index.len() {
                return;
            }
            index[dim] += 1;
            if index[dim] < region.size[dim + 1] {
                break;
            }
            index[dim] = 0;
            dim += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_len() {
        assert_eq!(required_len(&[4], &[], 4), Ok(16));
        assert_eq!(required_len(&[4, 4], &[4], 1), Ok(16));
        assert_eq!(required_len(&[4, 4], &[8], 1), Ok(28));
        assert_eq!(required_len(&[2, 2, 2], &[2, 4], 1), Ok(8));
        assert!(required_len(&[4, 4], &[3], 1).is_err());
        assert!(required_len(&[2, 2, 2], &[2, 3], 1).is_err());
    }

    #[test]
    fn test_packed_strides() {
        assert_eq!(packed_strides(&[4], 4), Ok(vec![]));
        assert_eq!(packed_strides(&[4, 3, 2], 2), Ok(vec![8, 24]));
    }

    #[test]
    fn test_resolve_region() {
        assert_eq!(
            Region::resolve(&[4, 4], None, Some(&[1, 1])),
            Ok(Region {
                minimum: vec![0, 0],
                size: vec![4, 4]
            })
        );
        assert_eq!(
            Region::resolve(&[4, 4], Some(&[1, 2]), Some(&[3, 4])),
            Ok(Region {
                minimum: vec![1, 2],
                size: vec![2, 2]
            })
        );
        assert!(Region::resolve(&[4, 4], Some(&[1]), Some(&[3, 4])).is_err());
        assert!(Region::resolve(&[4, 4], Some(&[0, 0]), Some(&[5, 4])).is_err());
        assert!(Region::resolve(&[4, 4], Some(&[2, 0]), Some(&[2, 4])).is_err());
    }

    #[test]
    fn test_copy_sub_region() {
        let mut texture = vec![0u8; 16];
        let region = Region::resolve(&[4, 4], Some(&[1, 1]), Some(&[3, 3])).unwrap();
        copy_region(&mut texture, &[4], &[1, 2, 3, 4], &[2], &region, 1);
        assert_eq!(
            texture,
            [0, 0, 0, 0, 0, 1, 2, 0, 0, 3, 4, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_copy_three_dimensions() {
        let mut texture = vec![0u8; 8];
        let region = Region::resolve(&[2, 2, 2], None, None).unwrap();
        let src: Vec<u8> = (1..=8).collect();
        copy_region(&mut texture, &[2, 4], &src, &[2, 4], &region, 1);
        assert_eq!(texture, src);
    }
}
