//! Ownership checks for changesets: every setter copies its inputs and
//! dropping a changeset frees exactly what it allocated.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

use hal_client::ChangeSet;

struct CountingAlloc;

thread_local! {
    static DEALLOCS: Cell<usize> = const { Cell::new(0) };
    static LIVE_BYTES: Cell<isize> = const { Cell::new(0) };
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            let _ = LIVE_BYTES.try_with(|b| b.set(b.get() + layout.size() as isize));
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _ = DEALLOCS.try_with(|d| d.set(d.get() + 1));
        let _ = LIVE_BYTES.try_with(|b| b.set(b.get() - layout.size() as isize));
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn deallocs() -> usize {
    DEALLOCS.with(Cell::get)
}

fn live_bytes() -> isize {
    LIVE_BYTES.with(Cell::get)
}

const DEVICE: &str = "/org/freedesktop/Hal/devices/computer";

fn populated() -> ChangeSet {
    let mut changes = ChangeSet::new(DEVICE).unwrap();
    changes.set_property_string("info.vendor", "Acme").unwrap();
    changes.set_property_int32("power.level", 3).unwrap();
    changes.set_property_uint64("storage.size", 1 << 33).unwrap();
    changes.set_property_double("battery.voltage", 11.1).unwrap();
    changes.set_property_bool("storage.removable", true).unwrap();
    changes.set_property_strlist("info.addons", &["acpi", "input"]).unwrap();
    changes.remove_property("info.linux.driver").unwrap();
    changes.strlist_append("info.capabilities", "block").unwrap();
    changes.strlist_prepend("info.capabilities", "storage").unwrap();
    changes.strlist_remove_index("info.capabilities", 4).unwrap();
    changes.strlist_remove_value("info.capabilities", "volume").unwrap();
    changes
}

#[test]
fn test_drop_frees_every_owned_buffer() {
    // Warm up anything lazily allocated on first use
    drop(populated());

    let start = live_bytes();
    let changes = populated();
    assert_eq!(changes.len(), 11);

    let before_drop = deallocs();
    drop(changes);
    let freed = deallocs() - before_drop;

    // identifier + change buffer, then per change the key plus its payload:
    // string 1, strlist 1 + 2 items, scalars and removals 0, list edits 1
    let keys = 11;
    let payloads = 1 + 3 + 1 + 1 + 1;
    assert_eq!(freed, 2 + keys + payloads);
    assert_eq!(live_bytes(), start);
}

#[test]
fn test_setters_copy_their_arguments() {
    let mut changes = ChangeSet::new(DEVICE).unwrap();
    {
        let key = String::from("info.vendor");
        let value = String::from("Acme");
        let list = vec![String::from("a"), String::from("b")];
        changes.set_property_string(&key, &value).unwrap();
        changes.set_property_strlist("info.addons", &list).unwrap();
    }

    let start = live_bytes();
    let copy = changes.clone();
    drop(changes);
    assert_eq!(copy.len(), 2);
    assert_eq!(copy.iter().next().map(|c| c.key()), Some("info.vendor"));
    drop(copy);
    assert!(live_bytes() < start);
}

#[test]
fn test_rejected_setter_leaks_nothing() {
    let mut changes = ChangeSet::new(DEVICE).unwrap();
    changes.set_property_bool("storage.removable", true).unwrap();
    let _ = changes.set_property_string("", "x");
    let _ = changes.strlist_append("info.addons", "bad\0value");

    let start = live_bytes();
    assert!(changes.set_property_string("", "x").is_err());
    assert!(changes.strlist_append("info.addons", "bad\0value").is_err());
    assert_eq!(live_bytes(), start);
    assert_eq!(changes.len(), 1);
}
