#[macro_use]
mod common;

#[cfg(test)]
mod control {
    tests! {
        loops in control is OK
        "7"
        "3"
    }

    tests! {
        branches in control is OK
        "odd"
        "in range"
    }

    tests! {
        switch in control is OK
        "wed"
        "fallback"
    }
}
