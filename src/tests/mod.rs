
mod balancer_tests;
mod emitter_tests;
mod fitter_tests;
mod gather_tests;
mod protocol_tests;
mod queue_tests;
