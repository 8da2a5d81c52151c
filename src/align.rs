use std::num::Wrapping;

/// Round `ix` up to the next multiple of `alignment`.
pub(crate) fn align(ix: usize, alignment: usize) -> usize {
    debug_assert!(
        alignment.is_power_of_two(),
        "{} is not power of 2, cannot be used as alignment",
        alignment
    );
    let mask = Wrapping(alignment) - Wrapping(1);
    let old_size = Wrapping(ix);
    let new_size = old_size + ((-old_size) & mask);
    debug_assert!(
        new_size >= old_size,
        "align function broke: {} < {}",
        new_size,
        old_size
    );
    new_size.0
}

/// Zero-pad `vec` out to `alignment`.
pub(crate) fn align_vec(vec: &mut Vec<u8>, alignment: usize) {
    vec.resize(align(vec.len(), alignment), 0);
}

#[cfg(test)]
mod tests {
    use super::{align, align_vec};

    #[test]
    fn alignment() {
        assert_eq!(align(23usize, 4usize), 24usize);
        assert_eq!(align(32usize, 4usize), 32usize);
        assert_eq!(align(31usize, 1usize), 31usize);
        assert_eq!(align(0usize, 1usize), 0usize);
        assert_eq!(align(25usize, 4usize), 28usize);
        assert_eq!(align(12usize, 8usize), 16usize);
        assert_eq!(align(16usize, 8usize), 16usize);
    }

    #[test]
    fn vec_padding() {
        let mut v = vec![1u8, 2, 3];
        align_vec(&mut v, 4);
        assert_eq!(v, vec![1, 2, 3, 0]);
        align_vec(&mut v, 4);
        assert_eq!(v, vec![1, 2, 3, 0]);
        align_vec(&mut v, 8);
        assert_eq!(v.len(), 8);
    }
}
