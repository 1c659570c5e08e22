#![no_main]

use std::ptr::NonNull;

use cmalloc_core::{AllocatorConfig, MallocState};
use libfuzzer_sys::fuzz_target;

const MAX_LIVE: usize = 256;

fuzz_target!(|data: &[u8]| {
    // Each 4-byte chunk is one op: [opcode, size lo, size hi, selector].
    if data.len() < 4 {
        return;
    }

    let state = MallocState::with_config(AllocatorConfig {
        retain_empty_slabs: 0,
        ..AllocatorConfig::default()
    });
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    for (step, chunk) in data.chunks_exact(4).enumerate() {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize * (1 + (chunk[3] >> 6) as usize);
        let tag = step as u8;
        let pick = |len: usize| chunk[3] as usize % len;

        match chunk[0] % 5 {
            0 | 1 if live.len() < MAX_LIVE => {
                let p = if chunk[0] % 5 == 0 {
                    state.allocate(size)
                } else {
                    state.zero_allocate(1, size)
                };
                if let Some(p) = p {
                    // SAFETY: p holds `size` bytes.
                    unsafe { p.as_ptr().write_bytes(tag, size) };
                    live.push((p, size, tag));
                }
            }
            2 if !live.is_empty() => {
                let (p, len, old) = live.swap_remove(pick(live.len()));
                // SAFETY: p is live; on success it is replaced by q.
                match unsafe { state.resize(Some(p), size) } {
                    Some(q) => {
                        // SAFETY: q holds at least `size` bytes.
                        let kept = unsafe { std::slice::from_raw_parts(q.as_ptr(), len.min(size)) };
                        assert!(kept.iter().all(|&b| b == old));
                        // SAFETY: q holds `size` bytes.
                        unsafe { q.as_ptr().write_bytes(tag, size) };
                        live.push((q, size, tag));
                    }
                    None => live.push((p, len, old)),
                }
            }
            3 if !live.is_empty() => {
                let (p, len, old) = live.swap_remove(pick(live.len()));
                // SAFETY: p is live with `len` bytes and released once.
                unsafe {
                    assert!(state.usable_size(Some(p)) >= len);
                    let data = std::slice::from_raw_parts(p.as_ptr(), len);
                    assert!(data.iter().all(|&b| b == old));
                    state.release(Some(p));
                }
            }
            4 => {
                let align = 1usize << (chunk[3] % 16);
                if let Some(p) = state.aligned_allocate(align, size) {
                    assert_eq!(p.as_ptr() as usize % align, 0);
                    // SAFETY: p is live and released once.
                    unsafe { state.release(Some(p)) };
                }
            }
            _ => {}
        }
    }

    for (p, _, _) in live {
        // SAFETY: p is live and released once.
        unsafe { state.release(Some(p)) };
    }
    assert_eq!(state.stats().outstanding(), 0);
});
