//! C interface for drivers in other languages. ARGs cross the boundary as an opaque handle and
//! as flattened integer arrays (see [`FlatTrees`]). Functions that can fail return a null handle
//! or `-1` and log the cause.

use std::os::raw::c_int;
use std::{ptr, slice};

use tracing::warn;

use crate::arg::{ArgSequence, FlatTrees};

unsafe fn read_rows(rows: *const *const c_int, nrows: usize, ncols: usize) -> Option<Vec<Vec<i32>>> {
    if rows.is_null() {
        return None;
    }

    let rows = slice::from_raw_parts(rows, nrows);
    rows.iter()
        .map(|&row| (!row.is_null()).then(|| slice::from_raw_parts(row, ncols).to_vec()))
        .collect()
}

/// Construct an ARG from flattened arrays and return an owning handle. The handle must be
/// released with [`delete_local_trees`]. Returns null if the input is invalid.
///
/// # Safety
/// `ptrees` and `ages` must point to `ntrees` arrays of `nnodes` integers each, `sprs` to
/// `ntrees` arrays of four integers, and `blocklens` to `ntrees` integers.
#[no_mangle]
pub unsafe extern "C" fn arghmm_new_trees(
    ptrees: *const *const c_int,
    ages: *const *const c_int,
    sprs: *const *const c_int,
    blocklens: *const c_int,
    ntrees: c_int,
    nnodes: c_int,
    start_coord: c_int,
) -> *mut ArgSequence {
    let (Ok(ntrees), Ok(nnodes), Ok(start_coord)) = (
        usize::try_from(ntrees),
        usize::try_from(nnodes),
        usize::try_from(start_coord),
    ) else {
        warn!(ntrees, nnodes, start_coord, "negative ARG dimensions");
        return ptr::null_mut();
    };

    let (Some(ptrees), Some(ages), Some(sprs)) = (
        read_rows(ptrees, ntrees, nnodes),
        read_rows(ages, ntrees, nnodes),
        read_rows(sprs, ntrees, 4),
    ) else {
        warn!("null array passed to arghmm_new_trees");
        return ptr::null_mut();
    };
    if blocklens.is_null() {
        warn!("null block lengths passed to arghmm_new_trees");
        return ptr::null_mut();
    }

    let flat = FlatTrees {
        ptrees,
        ages,
        sprs: sprs.iter().map(|spr| [spr[0], spr[1], spr[2], spr[3]]).collect(),
        blocklens: slice::from_raw_parts(blocklens, ntrees).to_vec(),
    };

    match ArgSequence::from_flat(&flat, start_coord) {
        Ok(arg) => Box::into_raw(Box::new(arg)),
        Err(err) => {
            warn!(%err, "could not construct ARG");
            ptr::null_mut()
        }
    }
}

/// Number of blocks of the ARG, or `-1` for a null handle.
///
/// # Safety
/// `trees` must be null or a handle returned by [`arghmm_new_trees`].
#[no_mangle]
pub unsafe extern "C" fn get_local_trees_ntrees(trees: *const ArgSequence) -> c_int {
    trees.as_ref().map_or(-1, |arg| arg.num_trees() as c_int)
}

/// Number of nodes per tree, or `-1` for a null handle.
///
/// # Safety
/// `trees` must be null or a handle returned by [`arghmm_new_trees`].
#[no_mangle]
pub unsafe extern "C" fn get_local_trees_nnodes(trees: *const ArgSequence) -> c_int {
    trees.as_ref().map_or(-1, |arg| arg.nnodes() as c_int)
}

/// Export the ARG into caller-provided arrays with the layout accepted by
/// [`arghmm_new_trees`]. Returns `0` on success and `-1` on failure.
///
/// # Safety
/// `trees` must be a handle returned by [`arghmm_new_trees`]. The output arrays must be
/// writable and sized as described for [`arghmm_new_trees`], using the dimensions reported by
/// [`get_local_trees_ntrees`] and [`get_local_trees_nnodes`].
#[no_mangle]
pub unsafe extern "C" fn get_local_trees_ptrees(
    trees: *const ArgSequence,
    ptrees: *const *mut c_int,
    ages: *const *mut c_int,
    sprs: *const *mut c_int,
    blocklens: *mut c_int,
) -> c_int {
    let Some(arg) = trees.as_ref() else {
        return -1;
    };
    if ptrees.is_null() || ages.is_null() || sprs.is_null() || blocklens.is_null() {
        warn!("null output array passed to get_local_trees_ptrees");
        return -1;
    }

    let flat = match arg.to_flat() {
        Ok(flat) => flat,
        Err(err) => {
            warn!(%err, "could not export ARG");
            return -1;
        }
    };

    let ntrees = flat.ntrees();
    let ptrees = slice::from_raw_parts(ptrees, ntrees);
    let ages = slice::from_raw_parts(ages, ntrees);
    let sprs = slice::from_raw_parts(sprs, ntrees);
    let blocklens = slice::from_raw_parts_mut(blocklens, ntrees);

    for i in 0..ntrees {
        if ptrees[i].is_null() || ages[i].is_null() || sprs[i].is_null() {
            warn!(block = i, "null output row passed to get_local_trees_ptrees");
            return -1;
        }
        slice::from_raw_parts_mut(ptrees[i], flat.ptrees[i].len()).copy_from_slice(&flat.ptrees[i]);
        slice::from_raw_parts_mut(ages[i], flat.ages[i].len()).copy_from_slice(&flat.ages[i]);
        slice::from_raw_parts_mut(sprs[i], 4).copy_from_slice(&flat.sprs[i]);
        blocklens[i] = flat.blocklens[i];
    }

    0
}

/// Release an ARG handle. Null handles are ignored.
///
/// # Safety
/// `trees` must be null or a handle returned by [`arghmm_new_trees`] that was not released
/// before.
#[no_mangle]
pub unsafe extern "C" fn delete_local_trees(trees: *mut ArgSequence) {
    if !trees.is_null() {
        drop(Box::from_raw(trees));
    }
}
