// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmarks for `understory_computed`.

use core::cell::Cell;
use std::rc::Rc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use understory_computed::{Computed, Property, Reactive, ReactiveObject, Stored, listener};

struct Chain {
    reactive: Reactive,
    a: Cell<i64>,
    b: Cell<i64>,
    d: Stored<i64>,
}

impl ReactiveObject for Chain {
    fn reactive(&self) -> &Reactive {
        &self.reactive
    }
}

impl Chain {
    const A: Property<Self, i64> = Property::new("A", |c| c.a.get());
    const B: Property<Self, i64> = Property::new("B", |c| c.b.get());
    const C: Computed<Self, i64> = Computed::new("C", |c, deps| deps.get(c, &Self::A) + 1);
    const D: Computed<Self, i64> = Computed::new("D", |c, deps| {
        deps.get(c, &Self::B) + deps.get_computed(c, &Self::C)
    });

    fn new(reactive: Reactive) -> Self {
        Self {
            reactive,
            a: Cell::new(0),
            b: Cell::new(0),
            d: Stored::new(),
        }
    }
}

struct Leaf {
    reactive: Reactive,
    value: Cell<i64>,
}

impl ReactiveObject for Leaf {
    fn reactive(&self) -> &Reactive {
        &self.reactive
    }
}

impl Leaf {
    const VALUE: Property<Self, i64> = Property::new("Value", |l| l.value.get());
}

struct Sum {
    reactive: Reactive,
    leaves: Vec<Rc<Leaf>>,
}

impl ReactiveObject for Sum {
    fn reactive(&self) -> &Reactive {
        &self.reactive
    }
}

impl Sum {
    const TOTAL: Computed<Self, i64> = Computed::new("Total", |s, deps| {
        s.leaves.iter().map(|leaf| deps.get(&**leaf, &Leaf::VALUE)).sum()
    });
}

fn bench_computed(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed/eval");

    group.bench_function("chain", |b| {
        let chain = Chain::new(Reactive::new());
        b.iter(|| black_box(Chain::D.eval(&chain)));
    });

    group.bench_function("stored_hit", |b| {
        let chain = Chain::new(Reactive::new_cached());
        Chain::D.eval_stored(&chain, &chain.d);
        b.iter(|| black_box(Chain::D.eval_stored(&chain, &chain.d)));
    });

    for leaves in [4_usize, 32, 256] {
        group.bench_function(BenchmarkId::new("fan_in", leaves), |b| {
            let sum = Sum {
                reactive: Reactive::new(),
                leaves: (0..leaves)
                    .map(|_| {
                        Rc::new(Leaf {
                            reactive: Reactive::new(),
                            value: Cell::new(1),
                        })
                    })
                    .collect(),
            };
            let _id = sum.reactive.subscribe(listener(|_, _| {}));
            b.iter(|| black_box(Sum::TOTAL.eval(&sum)));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("computed/announce");

    group.bench_function("chain", |b| {
        let chain = Chain::new(Reactive::new());
        Chain::D.eval(&chain);
        let _id = chain.reactive.subscribe(listener(|_, p| {
            black_box(p);
        }));
        let mut next = 0;
        b.iter(|| {
            next += 1;
            chain.reactive.set_cell(&chain.a, next, Chain::A.key())
        });
    });

    for leaves in [4_usize, 32, 256] {
        group.bench_function(BenchmarkId::new("upstream", leaves), |b| {
            let sum = Sum {
                reactive: Reactive::new(),
                leaves: (0..leaves)
                    .map(|_| {
                        Rc::new(Leaf {
                            reactive: Reactive::new(),
                            value: Cell::new(1),
                        })
                    })
                    .collect(),
            };
            Sum::TOTAL.eval(&sum);
            let _id = sum.reactive.subscribe(listener(|_, p| {
                black_box(p);
            }));
            let leaf = Rc::clone(&sum.leaves[leaves / 2]);
            let mut next = 0;
            b.iter(|| {
                next += 1;
                leaf.reactive.set_cell(&leaf.value, next, Leaf::VALUE.key())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_computed);
criterion_main!(benches);
