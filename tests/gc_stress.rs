//! Randomized object graphs held only by the evaluation stack, checked
//! against a host-side model after every round of allocation churn.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ember::heap::HeapObject;
use ember::{Config, Machine, Value};

#[derive(Debug, Clone)]
enum Shape {
    Nil,
    Int(i64),
    Float(f64),
    Str(String),
    Pair(Box<Shape>, Box<Shape>),
    Vector(Vec<Shape>),
}

fn random_shape(rng: &mut StdRng, depth: u32) -> Shape {
    let leaf = depth == 0 || rng.gen_bool(0.3);
    if leaf {
        return match rng.gen_range(0..4) {
            0 => Shape::Nil,
            1 => Shape::Int(rng.gen()),
            2 => Shape::Float(rng.gen_range(-1e6..1e6)),
            _ => Shape::Str((0..rng.gen_range(0..12)).map(|_| rng.gen_range('a'..='z')).collect()),
        };
    }
    if rng.gen_bool(0.75) {
        Shape::Pair(
            Box::new(random_shape(rng, depth - 1)),
            Box::new(random_shape(rng, depth - 1)),
        )
    } else {
        let n = rng.gen_range(0..5);
        Shape::Vector((0..n).map(|_| random_shape(rng, depth - 1)).collect())
    }
}

/// Build `shape` on the heap. Intermediate parts stay on the stack until
/// their parent is allocated.
fn build(m: &mut Machine, shape: &Shape) -> Value {
    match shape {
        Shape::Nil => Value::Nil,
        Shape::Int(n) => Value::FixNum(*n),
        Shape::Float(f) => m.make_float(*f).unwrap(),
        Shape::Str(s) => m.make_string(s).unwrap(),
        Shape::Pair(car, cdr) => {
            let a = build(m, car);
            m.stack.push(a).unwrap();
            let d = build(m, cdr);
            m.stack.push(d).unwrap();
            let (a, d) = (m.stack.top(2)[0], m.stack.top(2)[1]);
            let cell = m.cons(a, d).unwrap();
            m.stack.pop_n(2);
            cell
        }
        Shape::Vector(items) => {
            for item in items {
                let v = build(m, item);
                m.stack.push(v).unwrap();
            }
            let n = items.len();
            let items = m.stack.top(n).to_vec();
            let r = m.alloc(HeapObject::Vector { items, size: n }).unwrap();
            m.stack.pop_n(n);
            Value::Vector(r)
        }
    }
}

fn matches_shape(m: &Machine, v: Value, shape: &Shape) -> bool {
    match (v, shape) {
        (Value::Nil, Shape::Nil) => true,
        (Value::FixNum(a), Shape::Int(b)) => a == *b,
        (Value::Float(r), Shape::Float(f)) => m.heap.float(r) == *f,
        (Value::Str(r), Shape::Str(s)) => m.heap.string(r) == s,
        (Value::Cons(r), Shape::Pair(car, cdr)) => {
            matches_shape(m, m.heap.car(r), car) && matches_shape(m, m.heap.cdr(r), cdr)
        }
        (Value::Vector(r), Shape::Vector(items)) => {
            let (values, _) = m.heap.vector(r);
            values.len() == items.len()
                && values
                    .iter()
                    .zip(items)
                    .all(|(v, s)| matches_shape(m, *v, s))
        }
        _ => false,
    }
}

fn churn(m: &mut Machine, rng: &mut StdRng) {
    for _ in 0..rng.gen_range(10..200) {
        match rng.gen_range(0..3) {
            0 => {
                m.cons(Value::FixNum(0), Value::Nil).unwrap();
            }
            1 => {
                m.make_string("transient garbage").unwrap();
            }
            _ => {
                m.make_float(rng.gen()).unwrap();
            }
        }
    }
}

fn run(seed: u64, config: Config, rounds: usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut m = Machine::with_config(config).unwrap();
    let mut live: Vec<Shape> = Vec::new();

    for _ in 0..rounds {
        if live.len() < 12 && rng.gen_bool(0.7) {
            let shape = random_shape(&mut rng, 4);
            let v = build(&mut m, &shape);
            m.stack.push(v).unwrap();
            live.push(shape);
        } else if !live.is_empty() {
            // drop the newest root; its objects become garbage
            m.stack.pop();
            live.pop();
        }
        churn(&mut m, &mut rng);
        if rng.gen_bool(0.2) {
            m.collect();
        }
        assert_eq!(m.stack.len(), live.len());
        for (i, shape) in live.iter().enumerate() {
            assert!(
                matches_shape(&m, m.stack.get(i), shape),
                "root {} diverged from {:?}",
                i,
                shape
            );
        }
    }
    assert!(m.heap.collections() > 0);
}

#[test]
fn random_graphs_survive_natural_collections() {
    for seed in 0..8 {
        run(seed, Config::default().with_heap_bytes(1 << 16), 200);
    }
}

#[test]
fn random_graphs_survive_collection_on_every_allocation() {
    run(42, Config::default().with_gc_stress(true), 40);
}
