use std::sync::Arc;

use warp::Filter;

use crate::queue::PriorityQueue;
use crate::scheduler::Scheduler;

pub mod jobs;

pub fn routes(
  queue: Arc<PriorityQueue>,
  scheduler: Arc<Scheduler>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  jobs::submit_route(queue.clone())
    .or(jobs::pending_route(queue))
    .or(jobs::running_route(scheduler))
    .recover(jobs::handle_rejection)
}
