//! Walks through an arena holding a string buffer, a pool and a nested
//! arena, printing the accounting after each step.

use arenapool::{Arena, Pool, SArray};

#[derive(Debug, Default)]
#[allow(dead_code)]
struct Foo {
    value: [u8; 20],
    number: i32,
}

fn main() {
    let mut arena = Arena::new(1024);
    println!("Arena of {} bytes", arena.size());

    {
        let text = arena.allocate::<u8>(30).unwrap();
        println!("Got {} bytes for text; used {} of {}", text.len(), arena.used(), arena.size());

        // Pools can also own their memory: `Pool::<Foo>::new(5)`.
        let mut foo_pool: Pool<Foo> = Pool::with_arena(&arena, 5);
        println!("Pool of {}; arena used {}", foo_pool.size(), arena.used());

        let foo1 = foo_pool.allocate(Foo::default()).unwrap();
        let _foo2 = foo_pool.allocate(Foo { number: 2, ..Foo::default() }).unwrap();
        let foo3 = foo_pool.allocate_with(|| Foo { number: 3, ..Foo::default() }).unwrap();

        foo_pool.deallocate(foo3);
        if let Some(foo) = foo_pool.get_mut(foo1) {
            foo.number = 42;
        }
        println!("Pool using {} of {}", foo_pool.used(), foo_pool.size());

        // The new buffer is a separate range, not contiguous with the first.
        foo_pool.grow(10).unwrap();
        println!("Pool grown to {}; arena used {}", foo_pool.size(), arena.used());

        let child = Arena::with_parent(&arena, 400);
        println!(
            "Child arena: {} of {} used; parent used {}",
            child.used(),
            child.size(),
            arena.used()
        );

        let mut squares: SArray<u32> = SArray::with_arena(&child, 8);
        for i in 0..8 {
            squares.push(i * i);
        }
        squares.erase(2);
        squares.erase(5);
        println!("Sparse array: {squares:?}");
        squares.compact();
        println!("Compacted: {squares:?}; child used {}", child.used());
    }

    // Everything carved above is released in one step.
    arena.reset();
    println!("After reset: used {} of {}", arena.used(), arena.size());
}
