//! End-to-end tests for the priority heap

use photon_freelist::error::{Error, Result};
use photon_freelist::{HeapKind, HeapObject, HeapPosition, PriorityHeap};
use proptest::prelude::*;
use std::rc::Rc;

#[derive(Debug)]
struct Job {
    label: char,
    position: HeapPosition,
}

impl Job {
    fn new(label: char) -> Rc<Self> {
        Rc::new(Self {
            label,
            position: HeapPosition::new(),
        })
    }
}

impl HeapObject for Job {
    fn heap_position(&self) -> usize {
        self.position.heap_position()
    }

    fn set_heap_position(&self, position: usize) {
        self.position.set_heap_position(position)
    }
}

fn assert_tracked(heap: &PriorityHeap<Rc<Job>>, job: &Rc<Job>) {
    let (_, at) = heap
        .entry(job.heap_position())
        .expect("job should be tracked");
    assert!(Rc::ptr_eq(at, job));
}

#[test]
fn test_min_heap_scenario_with_duplicates() -> Result<()> {
    let mut heap = PriorityHeap::new(HeapKind::Min)?;
    let (a, b, c, d) = (Job::new('A'), Job::new('B'), Job::new('C'), Job::new('D'));
    heap.insert(10, Rc::clone(&a))?;
    heap.insert(4, Rc::clone(&b))?;
    heap.insert(15, Rc::clone(&c))?;
    heap.insert(4, Rc::clone(&d))?;

    assert_eq!(heap.peek()?, 4);
    let top = heap.peek_entry()?.1.label;
    assert!(top == 'B' || top == 'D');

    let (p1, first) = heap.extract()?;
    let (p2, second) = heap.extract()?;
    assert_eq!((p1, p2), (4, 4));
    let mut pair = [first.label, second.label];
    pair.sort_unstable();
    assert_eq!(pair, ['B', 'D']);

    let (p, job) = heap.extract()?;
    assert_eq!((p, job.label), (10, 'A'));
    let (p, job) = heap.extract()?;
    assert_eq!((p, job.label), (15, 'C'));
    assert_eq!(heap.extract().map(|(p, _)| p), Err(Error::EmptyHeap));
    Ok(())
}

#[test]
fn test_tracked_object_survives_churn() -> Result<()> {
    let mut heap = PriorityHeap::new(HeapKind::Max)?;
    let target = Job::new('T');
    heap.insert(5, Rc::clone(&target))?;
    assert_tracked(&heap, &target);

    let others: Vec<_> = (0..40).map(|i| (i, Job::new('x'))).collect();
    for (i, job) in &others {
        heap.insert((i * 7) % 23, Rc::clone(job))?;
        assert_tracked(&heap, &target);
    }
    for (i, job) in others.iter().take(20) {
        heap.change_priority(job, -i)?;
        assert_tracked(&heap, &target);
    }
    while heap.peek()? > 5 {
        heap.extract()?;
        assert_tracked(&heap, &target);
    }
    heap.check_invariants()
}

#[test]
fn test_remove_arbitrary_by_priority_change() -> Result<()> {
    let mut heap = PriorityHeap::new(HeapKind::Min)?;
    let jobs: Vec<_> = "abcdefgh".chars().map(Job::new).collect();
    for (i, job) in jobs.iter().enumerate() {
        heap.insert(100 + i as i64, Rc::clone(job))?;
    }

    // Push 'f' to the root and pop it
    heap.change_priority(&jobs[5], i64::MIN)?;
    let (_, out) = heap.extract()?;
    assert_eq!(out.label, 'f');
    assert_eq!(jobs[5].heap_position(), 0);
    assert_eq!(heap.count(), 7);
    heap.check_invariants()
}

#[derive(Debug, Clone)]
enum HeapOp {
    Insert(i64),
    Extract,
    Change(usize, i64),
    Increase(usize, u32),
    Decrease(usize, u32),
}

fn heap_op() -> impl Strategy<Value = HeapOp> {
    prop_oneof![
        3 => (-1000i64..1000).prop_map(HeapOp::Insert),
        1 => Just(HeapOp::Extract),
        1 => (any::<usize>(), -1000i64..1000).prop_map(|(i, p)| HeapOp::Change(i, p)),
        1 => (any::<usize>(), 0u32..500).prop_map(|(i, d)| HeapOp::Increase(i, d)),
        1 => (any::<usize>(), 0u32..500).prop_map(|(i, d)| HeapOp::Decrease(i, d)),
    ]
}

proptest! {
    #[test]
    fn prop_heap_invariants_hold(
        max in any::<bool>(),
        ops in prop::collection::vec(heap_op(), 1..300),
    ) {
        let kind = if max { HeapKind::Max } else { HeapKind::Min };
        let mut heap = PriorityHeap::new(kind).unwrap();
        let mut tracked: Vec<Rc<Job>> = Vec::new();

        for op in ops {
            match op {
                HeapOp::Insert(p) => {
                    let job = Job::new('p');
                    heap.insert(p, Rc::clone(&job)).unwrap();
                    tracked.push(job);
                }
                HeapOp::Extract => {
                    if heap.is_empty() {
                        prop_assert_eq!(heap.extract().map(|(p, _)| p), Err(Error::EmptyHeap));
                    } else {
                        let expected = heap.peek().unwrap();
                        let (p, job) = heap.extract().unwrap();
                        prop_assert_eq!(p, expected);
                        prop_assert_eq!(job.heap_position(), 0);
                        tracked.retain(|t| !Rc::ptr_eq(t, &job));
                    }
                }
                HeapOp::Change(i, p) if !tracked.is_empty() => {
                    let job = &tracked[i % tracked.len()];
                    heap.change_priority(job, p).unwrap();
                }
                HeapOp::Increase(i, d) if !tracked.is_empty() => {
                    let job = &tracked[i % tracked.len()];
                    heap.increase_priority(job, u64::from(d)).unwrap();
                }
                HeapOp::Decrease(i, d) if !tracked.is_empty() => {
                    let job = &tracked[i % tracked.len()];
                    heap.decrease_priority(job, u64::from(d)).unwrap();
                }
                _ => {}
            }

            prop_assert!(heap.check_invariants().is_ok());
            prop_assert_eq!(heap.count(), tracked.len());
            for job in &tracked {
                let (_, at) = heap.entry(job.heap_position()).unwrap();
                prop_assert!(Rc::ptr_eq(at, job));
            }
        }

        let mut last: Option<i64> = None;
        while let Ok((p, _)) = heap.extract() {
            if let Some(prev) = last {
                prop_assert!(!kind.outranks(p, prev));
            }
            last = Some(p);
        }
    }

    #[test]
    fn prop_extraction_sorted(mut priorities in prop::collection::vec(any::<i64>(), 0..100)) {
        let mut heap = PriorityHeap::new(HeapKind::Min).unwrap();
        for &p in &priorities {
            heap.insert(p, Job::new('s')).unwrap();
        }
        let mut out = Vec::new();
        while let Ok((p, _)) = heap.extract() {
            out.push(p);
        }
        priorities.sort_unstable();
        prop_assert_eq!(out, priorities);
    }
}
