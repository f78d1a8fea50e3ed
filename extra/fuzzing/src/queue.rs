use loopbridge::queue::channel;

// The idea is to push random runs of values of different sizes onto a
// small queue, interspersed with partial or full drains, and check
// that nothing is lost, duplicated or reordered, and that a push only
// ever fails when the queue is really full.

pub fn fuzz_queue(data: &[u8]) {
    let (cap_byte, data) = match data.split_first() {
        Some(v) => v,
        None => return,
    };
    // Requested capacity 0..=63, rounded up by the queue
    let (tx, mut rx) = channel::<Item>(usize::from(*cap_byte & 63), 8);
    let capacity = tx.capacity();
    assert!(capacity >= 2 && capacity.is_power_of_two());
    assert_eq!(capacity, rx.capacity());

    let mut expected = std::collections::VecDeque::new();
    let mut seq: u16 = 0;
    for b in data {
        seq = seq.wrapping_add(1);
        if *b < 4 {
            // Drain everything, or just a few, depending on the byte
            let count = if *b == 0 { usize::MAX } else { usize::from(*b) };
            for _ in 0..count {
                match rx.pop() {
                    Some(item) => item.check(expected.pop_front()),
                    None => {
                        assert!(expected.is_empty());
                        break;
                    }
                }
            }
        } else {
            let item = Item::new(seq, usize::from(*b & 15));
            match tx.push(item) {
                Ok(()) => expected.push_back((seq, usize::from(*b & 15))),
                Err(item) => {
                    assert_eq!(capacity, expected.len(), "push failed on a non-full queue");
                    assert_eq!(seq, item.seq);
                }
            }
        }
        assert_eq!(expected.len(), rx.len());
    }

    while let Some(item) = rx.pop() {
        item.check(expected.pop_front());
    }
    assert!(expected.is_empty());
    assert!(rx.is_empty());
}

struct Item {
    seq: u16,
    val: Vec<u16>,
}

impl Item {
    fn new(seq: u16, len: usize) -> Self {
        let mut val = vec![0; len];
        if len >= 2 {
            val[0] = seq;
            val[len - 1] = 44444_u16.wrapping_sub(seq);
        } else if len == 1 {
            val[0] = 22222;
        }
        Self { seq, val }
    }

    fn check(self, expected: Option<(u16, usize)>) {
        assert_eq!(Some((self.seq, self.val.len())), expected);
        let len = self.val.len();
        if len >= 2 {
            assert_eq!(44444, self.val[0].wrapping_add(self.val[len - 1]));
        }
    }
}
