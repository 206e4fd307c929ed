//! Property tests for object buffers

use ioc_scheduler::ObjectId;
use ioc_storage::{read_slices, write_slices, AccessMode, DeferredOperationList, Object};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_writes_read_back(
        alignment in prop::sample::select(vec![0usize, 16, 64]),
        writes in prop::collection::vec((0usize..512, 1usize..128, any::<u8>()), 1..20),
    ) {
        let mut object = Object::new(ObjectId::new(0, 1), None, alignment);
        let mut model = vec![0u8; 1024];

        for (offset, size, byte) in writes {
            let mut ops = DeferredOperationList::new();
            let slices = object.get_buffers(&mut ops, offset, size, AccessMode::Write, true).unwrap();
            prop_assert_eq!(write_slices(&slices, &vec![byte; size]), size);
            model[offset..offset + size].fill(byte);
        }

        let mut ops = DeferredOperationList::new();
        let slices = object.get_buffers(&mut ops, 0, 1024, AccessMode::Read, true).unwrap();
        let mut out = vec![0u8; 1024];
        prop_assert_eq!(read_slices(&slices, &mut out), 1024);
        prop_assert_eq!(out, model);

        let segments: Vec<_> = object.segments().map(|s| (s.offset(), s.end())).collect();
        for pair in segments.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0, "segments overlap: {:?}", pair);
        }
    }
}
