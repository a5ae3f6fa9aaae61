use framepool::storage::heap::{PageId, PAGE_SIZE};

/// Fill a page image with a pattern derived from the page id and a version,
/// so a reader can tell which write it observes.
pub fn stamp(data: &mut [u8], page_id: PageId, version: u64) {
    data[..8].copy_from_slice(&page_id.to_le_bytes());
    data[8..16].copy_from_slice(&version.to_le_bytes());
    let seed = (page_id as u64).wrapping_mul(31).wrapping_add(version);
    for (i, b) in data[16..PAGE_SIZE].iter_mut().enumerate() {
        *b = (seed.wrapping_add(i as u64) % 251) as u8;
    }
}

/// Check a stamped page image, return its version. A zero-filled page has
/// version 0.
pub fn verify(data: &[u8], page_id: PageId) -> u64 {
    if data.iter().all(|&b| b == 0) {
        return 0;
    }
    let id = PageId::from_le_bytes(data[..8].try_into().unwrap());
    assert_eq!(page_id, id, "page {} holds the image of page {}", page_id, id);
    let version = u64::from_le_bytes(data[8..16].try_into().unwrap());
    let mut expected = vec![0u8; PAGE_SIZE];
    stamp(&mut expected, page_id, version);
    assert!(expected == data, "page {} version {} is torn", page_id, version);
    version
}
