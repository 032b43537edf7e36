//! The optimizer (component F): a static four-phase pipeline that turns
//! a raw dimension list (as derived by the einsum-tree layer, or handed
//! in directly) into the canonical shape the tensor-operation driver
//! expects — a contiguous tail of 2-4 primitive dimensions, with every
//! other dimension marked sequential or shared.
//!
//! Grounded on `examples/original_source/src/ir/Optimizer.h` (the
//! `optimize`/`identifyPrimitives`/`splitDimensions`/`fuseDimensions`/
//! `createSharedLoops`/`findBestSplit` interface; no `.cpp` body was
//! retrieved, so the phase bodies below follow the design notes'
//! prose description of each phase and the Open Question decision on
//! the split fallback).

use super::dimension::{DimRole, Dimension, ExecMode};

/// Runs all four phases in the mandated order. `thread_target` is the
/// shared-loop promotion target; `max_kernel_size`/`min_kernel_size`
/// bound the split and fuse phases.
pub fn optimize(dims: &mut Vec<Dimension>, thread_target: i64, max_kernel_size: i64, min_kernel_size: i64) {
    identify_primitives(dims);
    split_dimensions(dims, max_kernel_size, min_kernel_size);
    fuse_dimensions(dims, min_kernel_size);
    create_shared_loops(dims, thread_target);
}

/// Phase 1. Picks one representative dimension per required role (M, N,
/// and either one K or two — the second becoming the batch-reduce axis
/// — depending on how many K-role dimensions are present) and moves it
/// to a canonical tail position. The representative is the candidate
/// with the smallest output/first-input stride for its role (the
/// "innermost" one), ties broken by later list position. Non-chosen
/// dimensions become sequential (existing shared/sequential dimensions
/// are left alone).
///
/// A dimension list with no M/N/K role at all — every axis is `C` — is
/// a pure unary/permutation node (§4.5, §9: "C is a permutation axis
/// with no natural M/N role of its own, resolved from stride-1 position
/// during driver setup"). For that case the two innermost `C` axes are
/// relabeled `N` and `M` so the unary kernel generators, which always
/// expect an M/N primitive pair, have one to compile against; the
/// remaining `C` axes stay `C` and fall to the sequential front like any
/// unchosen dimension.
///
/// Tail order is `[BR, K, N, M]` (trimmed to however many of those
/// roles are actually present): `M` last, as the design notes require,
/// and `K` to the right of `BR` so that a caller scanning right-to-left
/// for the first K-role primitive finds the reduction axis before the
/// batch-reduce axis.
pub fn identify_primitives(dims: &mut Vec<Dimension>) {
    let k_positions: Vec<usize> = dims.iter().enumerate().filter(|(_, d)| d.role == DimRole::K).map(|(i, _)| i).collect();

    let pick = |dims: &[Dimension], role: DimRole, exclude: &[usize]| -> Option<usize> {
        dims.iter()
            .enumerate()
            .filter(|(i, d)| d.role == role && !exclude.contains(i))
            .min_by_key(|(i, d)| (d.stride_out.abs().min(d.stride_in0.abs()), std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
    };

    let mut chosen: Vec<usize> = Vec::new();
    let k_idx = if k_positions.len() >= 2 {
        // Real K: the innermost (smallest stride) of the K-role dims.
        k_positions
            .iter()
            .copied()
            .min_by_key(|&i| (dims[i].stride_in0.abs(), std::cmp::Reverse(i)))
    } else {
        k_positions.first().copied()
    };
    let br_idx = if k_positions.len() >= 2 {
        k_positions.iter().copied().find(|&i| Some(i) != k_idx)
    } else {
        None
    };
    if let Some(i) = br_idx {
        chosen.push(i);
    }
    if let Some(i) = k_idx {
        chosen.push(i);
    }
    let mut n_idx = pick(dims, DimRole::N, &chosen);
    let mut m_idx = pick(dims, DimRole::M, &chosen);

    if n_idx.is_none() && m_idx.is_none() && k_idx.is_none() {
        // Unary kernels hardcode their vectorized inner axis as stride-1
        // in both tensors (component D never takes an M-axis stride
        // argument), so the innermost candidate must become M, not N.
        let mut c_candidates: Vec<usize> = dims.iter().enumerate().filter(|(_, d)| d.role == DimRole::C).map(|(i, _)| i).collect();
        c_candidates.sort_by_key(|&i| (dims[i].stride_out.abs().min(dims[i].stride_in0.abs()), std::cmp::Reverse(i)));
        if let Some(&i) = c_candidates.first() {
            dims[i].role = DimRole::M;
            m_idx = Some(i);
        }
        if let Some(&i) = c_candidates.get(1) {
            dims[i].role = DimRole::N;
            n_idx = Some(i);
        }
    }

    if let Some(i) = n_idx {
        chosen.push(i);
    }
    if let Some(i) = m_idx {
        chosen.push(i);
    }

    let mut front = Vec::with_capacity(dims.len());
    for (i, d) in dims.iter().enumerate() {
        if !chosen.contains(&i) {
            let mut d = *d;
            if d.exec_mode == ExecMode::Undefined {
                d.exec_mode = ExecMode::Sequential;
            }
            front.push(d);
        }
    }

    let mut tail = Vec::with_capacity(chosen.len());
    for i in chosen {
        let mut d = dims[i];
        d.exec_mode = ExecMode::Primitive;
        tail.push(d);
    }

    front.extend(tail);
    *dims = front;
}

/// Phase 2. For every primitive dimension whose size exceeds
/// `max_kernel_size`, finds `(size_0, size_1)` via [`find_best_split`]
/// and replaces it with an outer sequential dimension of `size_0`
/// (strides scaled by `size_1`) directly followed by the shrunk
/// primitive dimension of `size_1`.
pub fn split_dimensions(dims: &mut Vec<Dimension>, max_kernel_size: i64, min_kernel_size: i64) {
    let mut out = Vec::with_capacity(dims.len());
    for d in dims.iter() {
        if d.exec_mode == ExecMode::Primitive && d.size > max_kernel_size {
            let (size_0, size_1) = find_best_split(d.size, max_kernel_size, min_kernel_size);
            out.push(Dimension {
                role: d.role,
                exec_mode: ExecMode::Sequential,
                size: size_0,
                stride_in0: d.stride_in0 * size_1,
                stride_in1: d.stride_in1 * size_1,
                stride_out: d.stride_out * size_1,
            });
            out.push(Dimension {
                size: size_1,
                ..*d
            });
        } else {
            out.push(*d);
        }
    }
    *dims = out;
}

/// Largest divisor of `i_size` in `[i_min_size, i_max_size]`, scanned
/// from `i_max_size` down; falls back to the fully-sequential split
/// (`size_0 = i_size, size_1 = 1`) when no such divisor exists (see the
/// design notes' Open Question on this fallback).
pub fn find_best_split(i_size: i64, i_max_size: i64, i_min_size: i64) -> (i64, i64) {
    let mut candidate = i_max_size.min(i_size);
    while candidate >= i_min_size.max(1) {
        if i_size % candidate == 0 {
            return (i_size / candidate, candidate);
        }
        candidate -= 1;
    }
    (i_size, 1)
}

/// Phase 3. Merges adjacent sequential dimensions of the same role
/// whose combined trip count stays below `min_kernel_size`, collapsing
/// strides by keeping the inner (later, finer-grained) dimension's
/// stride — valid because split always produces a contiguous
/// outer/inner pair, and untouched input dimensions from the same
/// tensor are contiguous by construction.
pub fn fuse_dimensions(dims: &mut Vec<Dimension>, min_kernel_size: i64) {
    let mut out: Vec<Dimension> = Vec::with_capacity(dims.len());
    for d in dims.iter() {
        if let Some(last) = out.last_mut() {
            if last.exec_mode == ExecMode::Sequential
                && d.exec_mode == ExecMode::Sequential
                && last.role == d.role
                && last.size * d.size < min_kernel_size
            {
                last.size *= d.size;
                last.stride_in0 = d.stride_in0;
                last.stride_in1 = d.stride_in1;
                last.stride_out = d.stride_out;
                continue;
            }
        }
        out.push(*d);
    }
    *dims = out;
}

/// Phase 4. Promotes the outermost run of sequential M/N dimensions to
/// shared, stopping as soon as the running product of their sizes
/// meets or exceeds `thread_target` or a non-eligible dimension is hit.
pub fn create_shared_loops(dims: &mut [Dimension], thread_target: i64) {
    let mut product = 1i64;
    for d in dims.iter_mut() {
        if product >= thread_target {
            break;
        }
        if d.exec_mode != ExecMode::Sequential || !matches!(d.role, DimRole::M | DimRole::N) {
            break;
        }
        d.exec_mode = ExecMode::Shared;
        product *= d.size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(role: DimRole, mode: ExecMode, size: i64, s0: i64, s1: i64, so: i64) -> Dimension {
        Dimension::new(role, mode, size, s0, s1, so).unwrap()
    }

    #[test]
    fn find_best_split_prefers_largest_divisor_in_range() {
        assert_eq!(find_best_split(128, 64, 2), (2, 64));
        assert_eq!(find_best_split(100, 64, 2), (2, 50));
    }

    #[test]
    fn find_best_split_falls_back_on_prime_size() {
        assert_eq!(find_best_split(97, 64, 2), (97, 1));
    }

    #[test]
    fn identify_primitives_puts_m_last() {
        let mut dims = vec![
            dim(DimRole::K, ExecMode::Undefined, 32, 1, 64, 0),
            dim(DimRole::N, ExecMode::Undefined, 64, 0, 1, 1),
            dim(DimRole::M, ExecMode::Undefined, 128, 1, 0, 64),
        ];
        identify_primitives(&mut dims);
        assert_eq!(dims.last().unwrap().role, DimRole::M);
        assert!(dims.iter().all(|d| d.exec_mode == ExecMode::Primitive));
    }

    #[test]
    fn split_oversized_primitive_inserts_sequential_outer() {
        let mut dims = vec![dim(DimRole::M, ExecMode::Primitive, 128, 1, 0, 1)];
        split_dimensions(&mut dims, 64, 2);
        assert_eq!(dims.len(), 2);
        assert_eq!(dims[0].exec_mode, ExecMode::Sequential);
        assert_eq!(dims[0].size, 2);
        assert_eq!(dims[1].exec_mode, ExecMode::Primitive);
        assert_eq!(dims[1].size, 64);
        assert_eq!(dims[0].size * dims[1].size, 128);
    }

    #[test]
    fn fuse_merges_small_adjacent_sequential_same_role() {
        let mut dims = vec![
            dim(DimRole::M, ExecMode::Sequential, 2, 64, 0, 64),
            dim(DimRole::M, ExecMode::Sequential, 1, 32, 0, 32),
        ];
        fuse_dimensions(&mut dims, 8);
        assert_eq!(dims.len(), 1);
        assert_eq!(dims[0].size, 2);
    }

    #[test]
    fn identify_primitives_promotes_two_c_axes_for_a_pure_permutation() {
        let mut dims = vec![
            dim(DimRole::C, ExecMode::Undefined, 3, 27, 27, 27),
            dim(DimRole::C, ExecMode::Undefined, 3, 3, 3, 9),
            dim(DimRole::C, ExecMode::Undefined, 3, 9, 9, 3),
            dim(DimRole::C, ExecMode::Undefined, 3, 1, 1, 1),
        ];
        identify_primitives(&mut dims);

        let primitive: Vec<&Dimension> = dims.iter().filter(|d| d.exec_mode == ExecMode::Primitive).collect();
        assert_eq!(primitive.len(), 2);
        assert_eq!(primitive.last().unwrap().role, DimRole::M);
        assert_eq!(primitive.last().unwrap().stride_in0, 1);
        assert!(primitive.iter().any(|d| d.role == DimRole::N));
        assert!(dims.iter().filter(|d| d.exec_mode == ExecMode::Sequential).all(|d| d.role == DimRole::C));
    }

    #[test]
    fn create_shared_loops_stops_once_target_met() {
        let mut dims = vec![
            dim(DimRole::M, ExecMode::Sequential, 4, 1, 0, 1),
            dim(DimRole::N, ExecMode::Sequential, 4, 0, 1, 1),
            dim(DimRole::K, ExecMode::Primitive, 16, 1, 1, 1),
        ];
        create_shared_loops(&mut dims, 4);
        assert_eq!(dims[0].exec_mode, ExecMode::Shared);
        assert_eq!(dims[1].exec_mode, ExecMode::Sequential);
    }
}
