mod common;

use common::{current_pid, exe_identity, exe_mapping, init_logger, real_getpid};
use object::{Object, ObjectSymbol, ObjectSymbolTable, RelocationTarget};
use plt_hook::{Error, LibraryIdentity, MappedImage, Selector, image, maps};
use rstest::rstest;
use std::collections::BTreeSet;

/// Offsets of the dynamic relocations bound to `name` in the test executable,
/// as seen by the `object` crate.
fn object_relocation_offsets(name: &str) -> BTreeSet<usize> {
    let data = std::fs::read("/proc/self/exe").unwrap();
    let file = object::File::parse(&*data).unwrap();
    let dynsyms = file.dynamic_symbol_table().unwrap();
    file.dynamic_relocations()
        .unwrap()
        .filter_map(|(offset, reloc)| match reloc.target() {
            RelocationTarget::Symbol(idx) => {
                let sym = dynsyms.symbol_by_index(idx).ok()?;
                (sym.name().ok()? == name).then_some(offset as usize)
            }
            _ => None,
        })
        .collect()
}

#[rstest]
fn locates_the_executable() {
    init_logger();
    let maps = maps::scan_self();
    let exe = exe_mapping(&maps);
    let image = MappedImage::locate(&maps, &LibraryIdentity::of(&exe)).unwrap();
    let header = maps
        .iter()
        .filter(|map| map.dev == exe.dev && map.inode == exe.inode && map.offset == 0)
        .map(|map| map.start)
        .min()
        .unwrap();
    assert_eq!(image.base(), header);
    assert!(image.contains(exe.start, exe.len()));
    assert_eq!(image.path(), exe.path.as_deref());
}

#[rstest]
fn resolves_imported_function() {
    init_logger();
    // Make sure lazy binding, if any, already happened.
    assert_eq!(current_pid(), std::process::id() as i32);
    let maps = maps::scan_self();
    let image = MappedImage::locate(&maps, &exe_identity()).unwrap();
    let slots = image.resolve(&Selector::from("getpid")).unwrap();
    assert!(!slots.is_empty());
    for slot in &slots {
        assert_eq!(slot.address % size_of::<usize>(), 0);
        assert!(image.contains(slot.address, size_of::<usize>()));
    }
    assert!(slots.iter().any(|slot| slot.value == real_getpid()));
}

#[rstest]
fn slots_agree_with_object_crate() {
    let maps = maps::scan_self();
    let image = MappedImage::locate(&maps, &exe_identity()).unwrap();
    let expected = object_relocation_offsets("getpid");
    let slots = image.resolve(&Selector::from("getpid")).unwrap();
    for slot in slots {
        let offset = slot.address - image.bias();
        assert!(
            expected.contains(&offset),
            "slot offset 0x{offset:x} not among {expected:x?}"
        );
    }
}

#[rstest]
fn raw_offset_designates_the_same_slot() {
    let maps = maps::scan_self();
    let identity = exe_identity();
    let by_name = image::resolve(&maps, &identity, &Selector::from("getpid")).unwrap();
    let image = MappedImage::locate(&maps, &identity).unwrap();
    let offset = by_name[0].address - image.bias();
    let by_offset = image.resolve(&Selector::Offset(offset)).unwrap();
    assert_eq!(by_offset.len(), 1);
    assert_eq!(by_offset[0].address, by_name[0].address);
    assert_eq!(by_offset[0].value, by_name[0].value);
}

#[rstest]
fn unknown_symbol_is_reported() {
    let maps = maps::scan_self();
    let err = image::resolve(
        &maps,
        &exe_identity(),
        &Selector::from("plt_hook_no_such_symbol"),
    )
    .unwrap_err();
    assert!(matches!(err, Error::SymbolNotFound { .. }), "{err}");
}

#[rstest]
#[case(usize::MAX - 7)]
#[case(0x4000_0000)]
fn offset_outside_the_image_is_reported(#[case] offset: usize) {
    let maps = maps::scan_self();
    let err = image::resolve(&maps, &exe_identity(), &Selector::Offset(offset)).unwrap_err();
    assert!(matches!(err, Error::RelocationNotFound { .. }), "{err}");
}

#[rstest]
fn unmapped_library_is_reported() {
    let maps = maps::scan_self();
    let exe = exe_identity();
    let err = image::resolve(
        &maps,
        &LibraryIdentity::new(exe.dev, u64::MAX),
        &Selector::from("getpid"),
    )
    .unwrap_err();
    assert!(matches!(err, Error::LibraryNotMapped { .. }), "{err}");
}

#[rstest]
fn file_range_selects_the_header_mapping() {
    let maps = maps::scan_self();
    let exe = exe_identity();
    let whole = LibraryIdentity::with_range(exe.dev, exe.inode, 0, usize::MAX);
    assert!(image::resolve(&maps, &whole, &Selector::from("getpid")).is_ok());
    // No ELF header starts one page into the executable.
    let shifted = LibraryIdentity::with_range(exe.dev, exe.inode, 0x1000, usize::MAX);
    assert!(image::resolve(&maps, &shifted, &Selector::from("getpid")).is_err());
}
