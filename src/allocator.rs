use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};
use crate::interval_store::{span, IntervalStore};

/// First-fit, lowest-address search for a free subnet of the requested
/// prefix length. Parents are tried in configured order; within a parent,
/// candidates advance in ascending address order, jumping past any occupied
/// block in one step. Deterministic for a given store state.
pub fn find_free(store: &IntervalStore, parents: &[Ipv4Net], prefix: u8) -> Result<Ipv4Net> {
    if prefix > 32 {
        return Err(Error::InvalidPrefix(format!(
            "/{} is not a valid IPv4 prefix length",
            prefix
        )));
    }

    // A parent narrower than the requested block can never hold it.
    let usable: Vec<&Ipv4Net> = parents.iter().filter(|p| p.prefix_len() <= prefix).collect();
    if usable.is_empty() {
        return Err(Error::InvalidPrefix(format!(
            "/{} is larger than every parent supernet",
            prefix
        )));
    }

    let size = 1u64 << (32 - prefix);
    for parent in usable {
        let (parent_start, parent_end) = span(parent);
        // The parent base is aligned for its own prefix, hence also for any
        // longer one.
        let mut candidate = parent_start as u64;
        while candidate + size - 1 <= parent_end {
            match store.first_overlap(candidate as u32, candidate + size - 1) {
                None => {
                    let net = Ipv4Net::new(Ipv4Addr::from(candidate as u32), prefix)
                        .map_err(|e| Error::InvalidPrefix(e.to_string()))?;
                    return Ok(net);
                }
                Some(occupied) => {
                    let (_, occupied_end) = span(&occupied.cidr);
                    // next aligned address past the occupied block
                    candidate = (occupied_end + 1).div_ceil(size) * size;
                }
            }
        }
    }

    Err(Error::PoolExhausted(prefix))
}

/// Split a CIDR into its subnets of a longer prefix, e.g. a /24 into four
/// /26 blocks. Pure calculation, independent of the occupied list.
pub fn subnets_of(cidr: &Ipv4Net, new_prefix: u8) -> Result<Vec<Ipv4Net>> {
    if cidr.addr() != cidr.network() {
        return Err(Error::InvalidCidr(format!(
            "{} has host bits set",
            cidr
        )));
    }
    if new_prefix > 32 || new_prefix <= cidr.prefix_len() {
        return Err(Error::InvalidPrefix(format!(
            "/{} must be longer than the source prefix /{}",
            new_prefix,
            cidr.prefix_len()
        )));
    }
    let subnets = cidr
        .subnets(new_prefix)
        .map_err(|e| Error::InvalidPrefix(e.to_string()))?;
    Ok(subnets.collect())
}
