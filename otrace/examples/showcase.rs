//! Producer/consumer showcase: scopes, instants, counters, flows, frame
//! marks, thread metadata and color hints, flushed to `trace.json`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Job {
    id: u64,
    payload: u64,
}

struct Queue {
    jobs: Mutex<(VecDeque<Job>, bool)>,
    ready: Condvar,
}

fn main() {
    otrace::set_process_name("otrace-showcase");
    otrace::set_output_path("trace.json");

    {
        let _scope = otrace::scope("startup");
        std::thread::sleep(Duration::from_millis(12));
        otrace::instant_with_category("tick", "boot");
    }

    let queue = &*Box::leak(Box::new(Queue {
        jobs: Mutex::new((VecDeque::new(), false)),
        ready: Condvar::new(),
    }));

    let producer = std::thread::spawn(move || {
        otrace::set_thread_name("producer");
        otrace::set_thread_sort_index(10);

        for i in 0..12u64 {
            let _scope = otrace::Scope::with_arg("make_job", "compute", "i", i);
            std::thread::sleep(Duration::from_millis(3 + i % 2));
            otrace::flow_begin(i);
            {
                let mut guard = queue.jobs.lock().unwrap();
                guard.0.push_back(Job { id: i, payload: i });
                otrace::counter("queue_len", guard.0.len() as f64);
            }
            queue.ready.notify_one();
            otrace::mark_frame(i);
        }

        queue.jobs.lock().unwrap().1 = true;
        queue.ready.notify_all();
        otrace::mark_frame_labeled("present");
    });

    let consumer = std::thread::spawn(move || {
        otrace::set_thread_name("consumer");
        otrace::set_thread_sort_index(20);

        loop {
            let job = {
                let mut guard = queue.jobs.lock().unwrap();
                loop {
                    if let Some(job) = guard.0.pop_front() {
                        otrace::counter("queue_len", guard.0.len() as f64);
                        break Some(job);
                    }
                    if guard.1 {
                        break None;
                    }
                    guard = queue.ready.wait(guard).unwrap();
                }
            };
            let Some(job) = job else {
                break;
            };

            otrace::set_next_color("good");
            let _scope = otrace::Scope::with_arg("process", "io", "job", job.id);
            otrace::flow_step(job.id);
            std::thread::sleep(Duration::from_millis(2 + job.payload % 3));
            otrace::flow_end(job.id);
        }

        otrace::instant_with_category("tick", "shutdown");
    });

    producer.join().unwrap();
    consumer.join().unwrap();

    otrace::flush().unwrap();
    println!("wrote trace.json");
}
