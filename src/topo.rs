//! Worker-to-core placement.
//!
//! Topology is data, not code: callers describe the machine as an ordered
//! list of execution units and pick a placement policy. The default policy
//! spreads workers over physical cores of all NUMA nodes before touching
//! SMT siblings, because partitioning is memory-bandwidth-bound and two
//! hyperthreads on one core share the same memory pipes.
//!
//! Pinning is best-effort: a failure is logged as a warning and the worker
//! runs wherever the scheduler puts it.

use std::collections::BTreeMap;

/// One logical execution unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CpuDesc {
    /// OS core id, as used by the affinity syscall.
    pub core_id: usize,
    pub numa_node: usize,
    /// True for the second hardware thread of a physical core.
    pub is_smt: bool,
}

/// Ordered description of the machine's execution units.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    cpus: Vec<CpuDesc>,
}

impl Topology {
    pub fn new(cpus: Vec<CpuDesc>) -> Self {
        Self { cpus }
    }

    pub fn cpus(&self) -> &[CpuDesc] {
        &self.cpus
    }
}

/// Maps logical worker ids to core ids. `None` leaves a worker unpinned.
pub trait PlacementPolicy {
    fn assign(&self, topo: &Topology, workers: usize) -> Vec<Option<usize>>;
}

/// Default policy: physical cores first, round-robin across NUMA nodes,
/// then SMT siblings the same way. Workers beyond the machine's unit count
/// wrap around.
#[derive(Copy, Clone, Debug, Default)]
pub struct SpreadPhysicalFirst;

fn tier_order(cpus: &[CpuDesc], smt: bool) -> Vec<usize> {
    let mut per_node: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for cpu in cpus.iter().filter(|c| c.is_smt == smt) {
        per_node.entry(cpu.numa_node).or_default().push(cpu.core_id);
    }

    let mut order = Vec::new();
    let mut depth = 0;
    loop {
        let mut any = false;
        for ids in per_node.values() {
            if let Some(&id) = ids.get(depth) {
                order.push(id);
                any = true;
            }
        }
        if !any {
            break;
        }
        depth += 1;
    }
    order
}

impl PlacementPolicy for SpreadPhysicalFirst {
    fn assign(&self, topo: &Topology, workers: usize) -> Vec<Option<usize>> {
        let mut order = tier_order(topo.cpus(), false);
        order.extend(tier_order(topo.cpus(), true));
        if order.is_empty() {
            return vec![None; workers];
        }
        (0..workers).map(|w| Some(order[w % order.len()])).collect()
    }
}

/// Pin the calling thread to `core_id`.
#[cfg(target_os = "linux")]
pub fn pin_current(core_id: usize) -> std::io::Result<()> {
    // SAFETY: cpu_set_t is plain data; CPU_ZERO/CPU_SET only touch the
    // local set, and sched_setaffinity(0, ..) targets the calling thread.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core_id, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current(_core_id: usize) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "thread pinning is only implemented on Linux",
    ))
}

/// Best-effort pinning for a worker. Failure is a non-fatal placement
/// warning; the worker proceeds unpinned.
pub(crate) fn pin_or_warn(worker: usize, core_id: usize) {
    if let Err(e) = pin_current(core_id) {
        log::warn!("worker {worker}: could not pin to core {core_id}: {e}; running unpinned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-node, 16-physical-core SMT box: node 0 holds even cores 0..15,
    /// node 1 even cores 16..31, odd ids are the SMT siblings.
    fn two_node_box() -> Topology {
        let mut cpus = Vec::new();
        for node in 0..2 {
            for i in 0..8 {
                cpus.push(CpuDesc {
                    core_id: node * 16 + i * 2,
                    numa_node: node,
                    is_smt: false,
                });
                cpus.push(CpuDesc {
                    core_id: node * 16 + i * 2 + 1,
                    numa_node: node,
                    is_smt: true,
                });
            }
        }
        Topology::new(cpus)
    }

    #[test]
    fn physical_cores_interleave_nodes_first() {
        let assignment = SpreadPhysicalFirst.assign(&two_node_box(), 6);
        assert_eq!(
            assignment,
            vec![Some(0), Some(16), Some(2), Some(18), Some(4), Some(20)]
        );
    }

    #[test]
    fn smt_only_after_all_physical() {
        let assignment = SpreadPhysicalFirst.assign(&two_node_box(), 18);
        // 16 physical units first; workers 16 and 17 land on SMT siblings.
        assert_eq!(assignment[16], Some(1));
        assert_eq!(assignment[17], Some(17));
        for a in &assignment[..16] {
            assert_eq!(a.unwrap() % 2, 0);
        }
    }

    #[test]
    fn oversubscription_wraps() {
        let topo = two_node_box();
        let assignment = SpreadPhysicalFirst.assign(&topo, 40);
        assert_eq!(assignment[32], assignment[0]);
        assert_eq!(assignment[39], assignment[7]);
    }

    #[test]
    fn empty_topology_leaves_unpinned() {
        let assignment = SpreadPhysicalFirst.assign(&Topology::default(), 4);
        assert_eq!(assignment, vec![None; 4]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pinning_invalid_core_fails_nonfatally() {
        // Way past any real core count; the call must error, not panic.
        assert!(pin_current(100_000).is_err());
    }
}
