use coldstored::core::deploy::allowed_distribute_failures;

#[test]
fn test_forty_percent_rounded_down() {
    assert_eq!(allowed_distribute_failures(10), 4);
    assert_eq!(allowed_distribute_failures(5), 2);
    assert_eq!(allowed_distribute_failures(7), 2);
}

#[test]
fn test_minimum_of_one_failure_allowed() {
    assert_eq!(allowed_distribute_failures(1), 1);
    assert_eq!(allowed_distribute_failures(2), 1);
    assert_eq!(allowed_distribute_failures(3), 1);
}

#[test]
fn test_one_of_three_proceeds_two_aborts() {
    // Three nodes, one down: deployment continues.
    let allowed = allowed_distribute_failures(3);
    assert!(1 <= allowed);
    // Two down out of three: abort.
    assert!(2 > allowed);
}

#[test]
fn test_exactly_forty_percent_proceeds() {
    // Five nodes, two failures is exactly 40%: the pipeline proceeds.
    let allowed = allowed_distribute_failures(5);
    assert!(2 <= allowed);
    assert!(3 > allowed);
}
