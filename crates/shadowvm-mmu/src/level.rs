//! Level handlers.
//!
//! A shadow page fault is resolved in two passes. The planning pass walks
//! the guest and shadow tables side by side without writing anything, and
//! records a [`FaultDecision`] per level. Levels below a shadow table that
//! does not exist yet are read as empty. Only when the final decision keeps
//! the fault inside the monitor does the commit pass allocate tables and
//! write entries. A fault reflected into the guest therefore never leaves a
//! partially built shadow path behind.

use shadowvm_arch_x86::{
    AccessStatus, PageFaultErrorCode, PageTableLevel, PagingEntry, PagingMode, X86,
};
use shadowvm_core::{
    Architecture as _, HostRegionType, Hpa, Pa, RegionDescriptor, Va, VmmError,
};
use smallvec::SmallVec;
use zerocopy::IntoBytes as _;

use crate::{
    FaultResolution, ShadowDriver, ShadowPageState, ShadowPaging,
    decision::{FaultDecision, FaultInputs, TableRole, decide},
};

/// Entry format and large-page rules of one guest paging mode.
pub(crate) trait PagingFormat {
    /// Entry type shared by every level.
    type Entry: PagingEntry;

    /// The paging mode.
    const MODE: PagingMode;

    /// Checks if a guest directory entry at `level` maps a large page.
    ///
    /// Fails for large pages the engine cannot shadow.
    fn maps_large_page(
        state: &ShadowPageState,
        level: PageTableLevel,
        entry: Self::Entry,
    ) -> Result<bool, VmmError>;
}

/// One level of a planned fault resolution.
#[derive(Debug, Clone, Copy)]
struct LevelStep<E> {
    level: PageTableLevel,
    index: u64,
    decision: FaultDecision,

    /// Guest entry as read, and where it lives.
    guest: E,
    guest_entry: Pa,

    /// Shadow entry as read. Zero if its table does not exist yet.
    shadow: E,

    large_page: bool,

    /// Guest frame mapped by a leaf and its region.
    target: Option<Pa>,
    region: Option<RegionDescriptor>,
}

type Plan<E> = SmallVec<[LevelStep<E>; 4]>;

/// Computes the write permission of a shadow entry mapping `guest` and
/// updates the guest dirty bit.
///
/// A clean entry only becomes writable on a write the guest permits, which
/// marks it dirty. A read leaves it read-only so the first write faults.
fn dirty_policy<E>(guest: &mut E, error_code: PageFaultErrorCode) -> bool
where
    E: PagingEntry,
{
    if guest.dirty() {
        guest.write()
    } else if error_code.is_write() && AccessStatus::of(*guest, error_code) == AccessStatus::Ok {
        guest.set_dirty(true);
        true
    } else {
        false
    }
}

/// Builds a shadow entry pointing at `address`, copying the user and
/// execute-disable bits from the guest. Caching and global bits are always
/// cleared.
fn shadow_entry<E>(guest: E, address: u64, write: bool) -> E
where
    E: PagingEntry,
{
    let mut entry = E::default();
    entry.set_present(true);
    entry.set_user(guest.user());
    entry.set_execute_disable(guest.execute_disable());
    entry.set_write(write);
    entry.set_write_through(false);
    entry.set_cache_disable(false);
    entry.set_global(false);
    entry.set_address(address);
    entry
}

/// Demotes a mapping of host memory the entry format cannot point at to a
/// machine check.
fn check_reach<E>(
    decision: FaultDecision,
    target: Option<Pa>,
    region: Option<RegionDescriptor>,
) -> FaultDecision
where
    E: PagingEntry,
{
    match (decision, target, region) {
        (FaultDecision::MapFrame, Some(pa), Some(region)) => {
            let host = region.host_address(pa);
            if E::can_address(host.0) {
                return decision;
            }

            tracing::warn!(%pa, %host, "host frame out of reach of the shadow tables");
            FaultDecision::MachineCheck
        }
        _ => decision,
    }
}

impl<Driver> ShadowPaging<Driver>
where
    Driver: ShadowDriver,
{
    /// Resolves a fault taken while the guest runs on shadow tables.
    pub(crate) fn handle_shadow_fault<F>(
        &mut self,
        va: Va,
        error_code: PageFaultErrorCode,
    ) -> Result<FaultResolution, VmmError>
    where
        F: PagingFormat,
    {
        let guest_root = self.state.guest_cr3.root(F::MODE);
        let shadow_root = match self.state.shadow_root {
            Some(root) => root,
            None => self.activate_shadow_root()?,
        };

        let plan = self.plan_fault::<F>(va, error_code, guest_root, shadow_root)?;
        let last = plan
            .last()
            .ok_or(VmmError::Other("empty fault plan"))?;

        tracing::debug!(
            vcpu = %self.vcpu,
            %va,
            ?error_code,
            level = ?last.level,
            decision = ?last.decision,
            "shadow page fault"
        );

        match last.decision {
            FaultDecision::InjectPageFault => self.inject_page_fault(va, error_code),
            FaultDecision::MachineCheck => self.inject_machine_check(va),
            _ => self.commit_fault::<F>(va, error_code, shadow_root, &plan),
        }
    }

    fn plan_fault<F>(
        &self,
        va: Va,
        error_code: PageFaultErrorCode,
        guest_root: Pa,
        shadow_root: Hpa,
    ) -> Result<Plan<F::Entry>, VmmError>
    where
        F: PagingFormat,
    {
        let mode = F::MODE;
        let mut plan = Plan::new();
        let mut level = mode.root_level();
        let mut guest_table = guest_root;
        let mut shadow_table = Some(shadow_root);

        loop {
            let index = mode.index_for(va, level);
            let guest_entry = guest_table + index * F::Entry::SIZE;

            let guest = match self.read_guest_entry::<F::Entry>(guest_table, index) {
                Ok(entry) => entry,
                Err(err) if level == mode.root_level() => {
                    tracing::error!(%guest_table, %err, "guest root table is not readable");
                    return Err(VmmError::GuestRootUnreadable(guest_table));
                }
                Err(err) => {
                    tracing::debug!(%guest_table, ?level, %err, "guest table is not readable");
                    plan.push(LevelStep {
                        level,
                        index,
                        decision: FaultDecision::MachineCheck,
                        guest: F::Entry::default(),
                        guest_entry,
                        shadow: F::Entry::default(),
                        large_page: false,
                        target: None,
                        region: None,
                    });
                    return Ok(plan);
                }
            };

            let shadow = match shadow_table {
                Some(table) => self.read_shadow_entry::<F::Entry>(table, index)?,
                None => F::Entry::default(),
            };

            let large_page = F::maps_large_page(&self.state, level, guest)?;
            let role = match level.is_leaf() {
                true => TableRole::Leaf,
                false => TableRole::Directory,
            };

            let target = level.is_leaf().then(|| Pa(guest.address()));
            let region = target.and_then(|pa| self.driver.region(pa));

            let decision = decide(FaultInputs {
                role,
                guest: AccessStatus::of(guest, error_code),
                shadow: AccessStatus::of(shadow, error_code),
                large_page,
                region: region.map(|region| region.host_type),
            });
            let decision = check_reach::<F::Entry>(decision, target, region);

            tracing::trace!(?level, index, ?guest, ?shadow, ?decision, "planned level");

            plan.push(LevelStep {
                level,
                index,
                decision,
                guest,
                guest_entry,
                shadow,
                large_page,
                target,
                region,
            });

            if decision.is_terminal() {
                return Ok(plan);
            }

            let child = match decision {
                FaultDecision::Descend => Some(Hpa(shadow.address())),
                _ => None,
            };

            if large_page {
                let step = self.plan_large_leaf::<F>(va, error_code, guest, guest_entry, child)?;
                plan.push(step);
                return Ok(plan);
            }

            guest_table = Pa(guest.address());
            shadow_table = child;
            level = level
                .next()
                .ok_or(VmmError::Other("directory entry at the leaf level"))?;
        }
    }

    /// Plans the 4KB shadow leaf backing one slice of a guest large page.
    ///
    /// The guest has no table at this level. The large directory entry
    /// stands in for the guest leaf.
    fn plan_large_leaf<F>(
        &self,
        va: Va,
        error_code: PageFaultErrorCode,
        directory: F::Entry,
        directory_entry: Pa,
        shadow_table: Option<Hpa>,
    ) -> Result<LevelStep<F::Entry>, VmmError>
    where
        F: PagingFormat,
    {
        let index = F::MODE.index_for(va, PageTableLevel::Pt);
        let shadow = match shadow_table {
            Some(table) => self.read_shadow_entry::<F::Entry>(table, index)?,
            None => F::Entry::default(),
        };

        let target = Pa(directory.large_address() + va.offset_in(F::Entry::LARGE_PAGE_SIZE))
            .align_down(X86::PAGE_SIZE);
        let region = self.driver.region(target);

        let decision = decide(FaultInputs {
            role: TableRole::Leaf,
            guest: AccessStatus::of(directory, error_code),
            shadow: AccessStatus::of(shadow, error_code),
            large_page: true,
            region: region.map(|region| region.host_type),
        });
        let decision = check_reach::<F::Entry>(decision, Some(target), region);

        tracing::trace!(index, %target, ?shadow, ?decision, "planned large page leaf");

        Ok(LevelStep {
            level: PageTableLevel::Pt,
            index,
            decision,
            guest: directory,
            guest_entry: directory_entry,
            shadow,
            large_page: true,
            target: Some(target),
            region,
        })
    }

    fn commit_fault<F>(
        &mut self,
        va: Va,
        error_code: PageFaultErrorCode,
        shadow_root: Hpa,
        plan: &[LevelStep<F::Entry>],
    ) -> Result<FaultResolution, VmmError>
    where
        F: PagingFormat,
    {
        let mut table = shadow_root;

        // Guest entry written by the previous step. A large page leaf shares
        // its guest entry with the directory step above it.
        let mut committed: Option<(Pa, F::Entry)> = None;

        for step in plan {
            let entry = table + step.index * F::Entry::SIZE;
            let original = match committed {
                Some((address, guest)) if address == step.guest_entry => guest,
                _ => step.guest,
            };
            let mut guest = original;

            match step.decision {
                FaultDecision::AllocateTable => {
                    let level = step
                        .level
                        .next()
                        .ok_or(VmmError::Other("table allocation below the leaf level"))?;
                    let child = self
                        .frames
                        .allocate_child(&self.driver, F::MODE, level, table)?;

                    let write = match step.large_page {
                        true => dirty_policy(&mut guest, error_code),
                        false => guest.write(),
                    };
                    guest.set_accessed(true);

                    self.write_shadow_entry(entry, shadow_entry(guest, child.0, write))?;
                    self.update_guest_entry(step.guest_entry, original, guest)?;
                    committed = Some((step.guest_entry, guest));
                    table = child;
                }

                FaultDecision::Descend => {
                    table = Hpa(step.shadow.address());
                }

                FaultDecision::SyncDirty => {
                    if guest.write() {
                        guest.set_dirty(true);
                    }

                    let mut shadow = step.shadow;
                    shadow.set_write(guest.write());

                    self.write_shadow_entry(entry, shadow)?;
                    self.update_guest_entry(step.guest_entry, original, guest)?;
                    return Ok(FaultResolution::Resumed);
                }

                FaultDecision::MapFrame => {
                    let (pa, region) = Self::leaf_target(step)?;

                    // The large directory entry governs dirty tracking for
                    // the whole large page.
                    let write = match step.large_page {
                        true => guest.write(),
                        false => dirty_policy(&mut guest, error_code),
                    };
                    let write = write && region.host_type != HostRegionType::WriteHook;
                    guest.set_accessed(true);

                    let host = region.host_address(pa);
                    tracing::debug!(%va, %pa, %host, write, "shadow leaf mapped");

                    self.write_shadow_entry(entry, shadow_entry(guest, host.0, write))?;
                    self.update_guest_entry(step.guest_entry, original, guest)?;
                    return Ok(FaultResolution::Resumed);
                }

                FaultDecision::FullHook => {
                    let (pa, region) = Self::leaf_target(step)?;
                    let pa = pa + va.offset_in(X86::PAGE_SIZE);
                    return self.dispatch_hook(va, pa, Some(region), error_code);
                }

                FaultDecision::WriteHook => {
                    let (pa, region) = Self::leaf_target(step)?;
                    let pa = pa + va.offset_in(X86::PAGE_SIZE);

                    guest.set_dirty(true);
                    self.update_guest_entry(step.guest_entry, original, guest)?;
                    return self.dispatch_hook(va, pa, Some(region), error_code);
                }

                FaultDecision::Stale => {
                    tracing::debug!(%va, "shadow entry already valid, stale TLB entry");
                    return Ok(FaultResolution::Resumed);
                }

                FaultDecision::InvalidateStale => {
                    tracing::debug!(%va, level = ?step.level, "guest dropped a shadowed entry");

                    self.write_shadow_entry(entry, F::Entry::default())?;
                    if !step.level.is_leaf() && self.config.release_invalidated_tables {
                        self.frames
                            .release_subtree(&self.driver, Hpa(step.shadow.address()))?;
                    }
                    return Ok(FaultResolution::Resumed);
                }

                FaultDecision::InjectPageFault => return self.inject_page_fault(va, error_code),
                FaultDecision::MachineCheck => return self.inject_machine_check(va),
            }
        }

        Err(VmmError::Other("fault plan ended without a terminal decision"))
    }

    fn leaf_target<E>(step: &LevelStep<E>) -> Result<(Pa, RegionDescriptor), VmmError> {
        match (step.target, step.region) {
            (Some(pa), Some(region)) => Ok((pa, region)),
            _ => Err(VmmError::Other("leaf decision without a region")),
        }
    }

    pub(crate) fn read_guest_entry<E>(&self, table: Pa, index: u64) -> Result<E, VmmError>
    where
        E: PagingEntry,
    {
        self.driver
            .read_guest_page(X86::gfn_from_pa(table))?
            .entry::<E>(index as usize)
            .ok_or(VmmError::Other("guest page table read out of bounds"))
    }

    pub(crate) fn read_shadow_entry<E>(&self, table: Hpa, index: u64) -> Result<E, VmmError>
    where
        E: PagingEntry,
    {
        self.driver
            .read_host_page(table)?
            .entry::<E>(index as usize)
            .ok_or(VmmError::Other("shadow page table read out of bounds"))
    }

    pub(crate) fn write_shadow_entry<E>(&self, entry: Hpa, value: E) -> Result<(), VmmError>
    where
        E: PagingEntry,
    {
        self.driver.write_host(entry, value.as_bytes())
    }

    /// Writes a guest entry back if the engine changed it.
    pub(crate) fn update_guest_entry<E>(&self, entry: Pa, old: E, new: E) -> Result<(), VmmError>
    where
        E: PagingEntry,
    {
        if old == new {
            return Ok(());
        }

        self.driver.write_guest(entry, new.as_bytes())
    }
}
