// Integration tests

mod common;
mod iap_job_test;
mod membership_job_test;
