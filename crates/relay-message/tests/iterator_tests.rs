//! Field-iterator behavior: router views, address-header skipping, and the
//! capabilities the router relies on (equality, prefixes, sub-iterators,
//! scatter lists) over both spans and buffer chains.

use relay_message::{set_router_identity, BufferChain, FieldIterator, View};

fn chain_from(bytes: &[u8]) -> BufferChain {
    let mut chain = BufferChain::new();
    assert!(chain.append_bytes(bytes));
    chain
}

/// Builds a chain where `bytes` is split across several buffers by
/// interposing pre-filled segments.
fn fragmented_chain(bytes: &[u8], at: usize) -> BufferChain {
    let mut chain = chain_from(&bytes[..at.min(bytes.len())]);
    if at < bytes.len() {
        let mut rest = chain_from(&bytes[at..]);
        chain.splice_back(&mut rest);
    }
    chain
}

fn hash_view(address: &str) -> Vec<u8> {
    set_router_identity("area1", "r1");
    let mut iter = FieldIterator::over_str(address, View::AddressHash);
    iter.to_vec()
}

// =============================================================================
// Router-address hash view
// =============================================================================

#[test]
fn local_address_gets_l_prefix() {
    assert_eq!(hash_view("_local/svc"), b"Lsvc");
}

#[test]
fn topo_all_all_is_local() {
    assert_eq!(hash_view("_topo/all/all/svc"), b"Lsvc");
}

#[test]
fn topo_own_area_all_is_local() {
    assert_eq!(hash_view("_topo/area1/all/svc"), b"Lsvc");
}

#[test]
fn topo_own_area_own_router_is_local() {
    assert_eq!(hash_view("_topo/area1/r1/svc"), b"Lsvc");
}

#[test]
fn topo_other_router_targets_that_router() {
    // Mode stops at the slash: only the router component is yielded.
    assert_eq!(hash_view("_topo/area1/r2/svc"), b"Rr2");
}

#[test]
fn topo_other_area_targets_that_area() {
    assert_eq!(hash_view("_topo/area2/rX/svc"), b"Aarea2");
}

#[test]
fn mobile_address_gets_m_prefix() {
    assert_eq!(hash_view("queue.orders"), b"Mqueue.orders");
}

// =============================================================================
// Router-node hash view
// =============================================================================

#[test]
fn node_in_own_area_targets_the_router() {
    set_router_identity("area1", "r1");
    let mut iter = FieldIterator::over_str("area1/r9/detail", View::NodeHash);
    assert_eq!(iter.to_vec(), b"Rr9/detail");
}

#[test]
fn node_in_other_area_targets_the_area() {
    set_router_identity("area1", "r1");
    let mut iter = FieldIterator::over_str("area2/r9/detail", View::NodeHash);
    assert_eq!(iter.to_vec(), b"Aarea2");
}

// =============================================================================
// Address-header skipping
// =============================================================================

#[test]
fn scheme_and_port_are_skipped_for_node_id() {
    let mut iter = FieldIterator::over_str("amqp://host:5672/node/x", View::NodeId);
    assert_eq!(iter.to_vec(), b"node");
}

#[test]
fn scheme_and_port_are_skipped_for_node_specific() {
    let mut iter = FieldIterator::over_str("amqp://host:5672/node/x", View::NodeSpecific);
    assert_eq!(iter.to_vec(), b"x");
}

#[test]
fn double_slash_host_form_is_skipped() {
    let mut iter = FieldIterator::over_str("//host/node/x", View::NoHost);
    assert_eq!(iter.to_vec(), b"node/x");
}

#[test]
fn relative_address_is_not_skipped() {
    let mut iter = FieldIterator::over_str("node/x", View::NodeId);
    assert_eq!(iter.to_vec(), b"node");
}

#[test]
fn view_all_never_skips() {
    let mut iter = FieldIterator::over_str("amqp://host/node", View::All);
    assert_eq!(iter.to_vec(), b"amqp://host/node");
}

// =============================================================================
// Capabilities
// =============================================================================

#[test]
fn equality_includes_the_synthetic_prefix() {
    set_router_identity("area1", "r1");
    let mut iter = FieldIterator::over_str("_local/svc", View::AddressHash);
    assert!(iter.eq_bytes(b"Lsvc"));
    assert!(!iter.eq_bytes(b"svc"));
    assert!(!iter.eq_bytes(b"Lsv"));
    assert!(!iter.eq_bytes(b"Lsvcx"));
}

#[test]
fn reset_reenables_the_prefix() {
    set_router_identity("area1", "r1");
    let mut iter = FieldIterator::over_str("queue.a", View::AddressHash);
    assert_eq!(iter.octet(), b'M');
    assert_eq!(iter.octet(), b'q');
    iter.reset();
    assert_eq!(iter.octet(), b'M');
}

#[test]
fn views_work_across_buffer_boundaries() {
    set_router_identity("area1", "r1");
    let address = b"_topo/area1/r2/svc";
    for split in 1..address.len() {
        let chain = fragmented_chain(address, split);
        let mut iter = FieldIterator::over_chain(&chain, 0, 0, address.len(), View::AddressHash);
        assert_eq!(iter.to_vec(), b"Rr2", "split at {split}");
    }
}

#[test]
fn sub_iterator_spans_boundaries() {
    let bytes = b"abcdefghij";
    let chain = fragmented_chain(bytes, 4);
    let mut iter = FieldIterator::over_chain(&chain, 0, 0, bytes.len(), View::All);
    iter.advance(2);
    let mut sub = iter.sub(5);
    assert_eq!(sub.to_vec(), b"cdefg");
    // The parent cursor is untouched by the sub-iterator.
    assert_eq!(iter.octet(), b'c');
}

#[test]
fn remaining_counts_down() {
    let mut iter = FieldIterator::over_str("abcd", View::All);
    assert_eq!(iter.remaining(), 4);
    iter.advance(3);
    assert_eq!(iter.remaining(), 1);
    iter.advance(10);
    assert_eq!(iter.remaining(), 0);
    assert!(iter.at_end());
}

#[test]
fn io_slices_cover_every_fragment() {
    let bytes = b"one-buffer-two-buffer";
    let chain = fragmented_chain(bytes, 10);
    let iter = FieldIterator::over_chain(&chain, 0, 0, bytes.len(), View::All);

    let slices = iter.io_slices().expect("plain view scatters");
    assert_eq!(slices.len(), 2);
    let joined: Vec<u8> = slices.iter().flat_map(|s| s.to_vec()).collect();
    assert_eq!(joined, bytes);
}

#[test]
fn io_slices_refuse_prefix_views() {
    // Release builds return None; debug builds assert. Both refuse.
    if cfg!(debug_assertions) {
        let result = std::panic::catch_unwind(|| {
            set_router_identity("area1", "r1");
            let iter = FieldIterator::over_str("queue.a", View::AddressHash);
            iter.io_slices()
        });
        assert!(result.is_err());
    } else {
        set_router_identity("area1", "r1");
        let iter = FieldIterator::over_str("queue.a", View::AddressHash);
        assert!(iter.io_slices().is_none());
    }
}

#[test]
fn chain_iterator_subrange_is_honored() {
    let chain = chain_from(b"xxheartyy");
    let mut iter = FieldIterator::over_chain(&chain, 0, 2, 5, View::All);
    assert_eq!(iter.to_vec(), b"heart");
}
