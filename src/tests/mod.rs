// Test modules for the scheduler and the failover orchestration
//
// 调度器与故障转移编排测试模块

mod scheduler {
    mod admission_tests;
    mod cancel_tests;
    mod schedule_tests;
}

mod failover {
    mod coalesce_tests;
    mod redirect_tests;
    mod support;
}
