use shadowvm_arch_x86::{Cr3, PageFaultErrorCode, PageTableEntry32, PagingMode};
use shadowvm_core::{Va, VcpuId, VmmError};

use super::{
    MockDriver, PRESENT, USER, WRITE, legacy_engine, legacy_paging, long_paging, paging_off,
    shadow_leaf,
};
use crate::{MemoryMode, ShadowPaging};

const PD: u64 = 0x1000;
const PT: u64 = 0x2000;
const VA: Va = Va(0x0040_3000);

fn mapped_engine() -> Result<ShadowPaging<MockDriver>, VmmError> {
    let mut engine = legacy_engine(PD, false)?;
    let driver = engine.driver();
    driver.set_guest_entry(PD, 1, PageTableEntry32((PT | PRESENT | WRITE | USER) as u32));
    driver.set_guest_entry(PT, 3, PageTableEntry32((0x5000 | PRESENT | WRITE | USER) as u32));

    engine.handle_page_fault(VA, PageFaultErrorCode::empty())?;
    assert_eq!(engine.frames().len(), 2);
    Ok(engine)
}

#[test]
fn initial_state() -> Result<(), VmmError> {
    let engine = ShadowPaging::new(MockDriver::new()?, VcpuId(0));
    let state = engine.state();

    assert_eq!(state.memory_mode, MemoryMode::Physical);
    assert_eq!(state.guest_mode, PagingMode::Legacy);
    assert_eq!(state.shadow_mode, PagingMode::Legacy);
    assert_eq!(state.guest_cr3, Cr3(0));
    assert_eq!(state.shadow_root, None);
    assert_eq!(engine.shadow_cr3(), Cr3(0));
    assert!(engine.frames().is_empty());
    Ok(())
}

#[test]
fn cr3_write_retires_context() -> Result<(), VmmError> {
    let mut engine = mapped_engine()?;
    let old_root = engine.state().shadow_root;
    let old_frames: Vec<_> = engine.frames().iter().map(|frame| frame.hpa).collect();

    engine.write_guest_cr3(Cr3(PD))?;

    let mut freed = engine.driver().freed();
    freed.sort();
    assert_eq!(freed, old_frames);

    let root = engine.state().shadow_root;
    assert!(root.is_some());
    assert_ne!(root, old_root);
    assert_eq!(engine.frames().len(), 1);
    assert_eq!(engine.frames().contexts(), root.into_iter().collect::<Vec<_>>());
    assert_eq!(engine.shadow_cr3(), root.map(Cr3::from).unwrap_or_default());

    // The mapping is rebuilt on demand.
    assert!(shadow_leaf::<PageTableEntry32>(&engine, VA).is_none());
    engine.handle_page_fault(VA, PageFaultErrorCode::empty())?;
    assert!(shadow_leaf::<PageTableEntry32>(&engine, VA).is_some());
    Ok(())
}

#[test]
fn unchanged_paging_mode_keeps_context() -> Result<(), VmmError> {
    let mut engine = mapped_engine()?;
    let (cr0, cr4, efer) = legacy_paging(false);

    engine.update_paging_mode(cr0, cr4, efer)?;

    assert!(engine.driver().freed().is_empty());
    assert!(shadow_leaf::<PageTableEntry32>(&engine, VA).is_some());
    Ok(())
}

#[test]
fn mode_change_retires_context() -> Result<(), VmmError> {
    let mut engine = mapped_engine()?;
    let (cr0, cr4, efer) = long_paging();

    engine.update_paging_mode(cr0, cr4, efer)?;

    assert_eq!(engine.driver().freed().len(), 2);
    assert_eq!(engine.state().guest_mode, PagingMode::Long);
    assert_eq!(engine.state().shadow_mode, PagingMode::Long);
    assert_eq!(engine.frames().len(), 1);
    Ok(())
}

#[test]
fn pse_toggle_retires_context() -> Result<(), VmmError> {
    let mut engine = mapped_engine()?;
    let (cr0, cr4, efer) = legacy_paging(true);

    engine.update_paging_mode(cr0, cr4, efer)?;

    assert_eq!(engine.driver().freed().len(), 2);
    assert!(engine.state().page_size_extensions);
    Ok(())
}

#[test]
fn disabling_paging_loads_passthrough() -> Result<(), VmmError> {
    let mut engine = mapped_engine()?;
    let (cr0, cr4, efer) = paging_off();

    engine.update_paging_mode(cr0, cr4, efer)?;

    assert_eq!(engine.driver().freed().len(), 2);
    assert_eq!(engine.state().memory_mode, MemoryMode::Physical);
    assert_eq!(engine.state().shadow_mode, PagingMode::Legacy);
    assert!(engine.state().shadow_root.is_some());

    // Enabling paging again starts from an empty context.
    let (cr0, cr4, efer) = legacy_paging(false);
    engine.update_paging_mode(cr0, cr4, efer)?;
    assert_eq!(engine.state().memory_mode, MemoryMode::Virtual);
    assert_eq!(engine.frames().len(), 1);
    Ok(())
}

#[test]
fn retiring_another_context_spares_the_loaded_one() -> Result<(), VmmError> {
    let mut engine = mapped_engine()?;

    let tables = engine.build_identity_tables(PagingMode::Long)?;
    assert_eq!(engine.frames().contexts().len(), 2);

    let released = engine.retire_context(tables.root)?;
    assert_eq!(released, tables.frames);
    assert_eq!(engine.frames().len(), 2);
    assert!(shadow_leaf::<PageTableEntry32>(&engine, VA).is_some());
    Ok(())
}

#[test]
fn retired_loaded_context_is_rebuilt_lazily() -> Result<(), VmmError> {
    let mut engine = mapped_engine()?;
    let root = engine
        .state()
        .shadow_root
        .ok_or(VmmError::Other("no root"))?;

    assert_eq!(engine.retire_context(root)?, 2);
    assert_eq!(engine.state().shadow_root, None);
    assert_eq!(engine.shadow_cr3(), Cr3(0));

    engine.handle_page_fault(VA, PageFaultErrorCode::empty())?;
    assert!(engine.state().shadow_root.is_some());
    assert!(shadow_leaf::<PageTableEntry32>(&engine, VA).is_some());
    Ok(())
}

#[test]
fn drop_releases_every_frame() -> Result<(), VmmError> {
    let engine = mapped_engine()?;
    let log = engine.driver().freed_log();
    let frames = engine.frames().len();

    drop(engine);
    assert_eq!(log.borrow().len(), frames);
    Ok(())
}
