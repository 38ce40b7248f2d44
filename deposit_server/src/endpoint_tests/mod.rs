mod helpers;
mod misc;
mod payments;
