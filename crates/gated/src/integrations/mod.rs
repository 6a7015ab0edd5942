mod bft;
