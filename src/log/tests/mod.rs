mod tests_corruption;
mod tests_round_trip;
